//! Value Codec: the generic value model to and from store-native values.
//!
//! Pure, no I/O. Field-level encoding lives in [`value`], whole-document
//! layout in [`document`].

pub mod document;
pub mod value;

pub use document::{
    decode_document, encode_document, encode_field, generate_object_id, native_field_name,
    ACL_KEY, CREATED_AT_KEY, ID_KEY, READ_PERM_KEY, UPDATED_AT_KEY, WRITE_PERM_KEY,
};
pub use value::{decode, decode_schemaless, encode, encode_schemaless, parse_pointer_key, pointer_key};
