pub mod element;
pub mod vint;

pub use element::{EbmlDocument, ElemRef, VOID_ID};
