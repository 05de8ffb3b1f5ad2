//! Simplestreams image remotes: the wire model of `streams/v1` catalogues
//! and the HTTP client that serves them as an [`ImageServer`].
//!
//! [`ImageServer`]: crate::helpers::image_resolver::ImageServer

mod catalog;
mod client;
mod image;
mod index;
mod item;
mod product;
mod version;

pub use catalog::Catalog;
pub use client::SimpleStreamsConnector;
pub use image::StreamImage;
pub use index::Index;
pub use item::Item;
pub use product::Product;
pub use version::Version;
