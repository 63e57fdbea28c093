mod cache;
mod inst;

pub use cache::DecodeCache;
pub use inst::{decode, decode16, decode32, DecodeError, DecodedInst, Opcode};
