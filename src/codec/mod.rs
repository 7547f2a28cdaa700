// Codec module for the FlatBuffers wire format

pub mod primitives;
pub mod input;
pub mod vtable;
pub mod shared_strings;
pub mod context;
pub mod value;
pub mod sorted;
pub mod pod;
pub mod writer;
pub mod reader;
pub mod view;
