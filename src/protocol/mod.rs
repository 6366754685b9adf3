//! Wire-adjacent types shared by the track descriptor and the range loader.
//!
//! Only the small slice of the original gateway protocol that this crate
//! actually needs is represented here: the cipher the track was encoded
//! with, and a content-type hint for the decoder. Everything else about
//! the gateway's request/response shapes is out of scope.

pub mod media;
