mod common;
mod management;
mod registry;
mod switching;
