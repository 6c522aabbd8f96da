//! Version-dispatching facade over the raw `Message` request/publish API.

pub mod v0;
