use serde::Deserialize;
use std::collections::HashMap;

use super::StreamImage;

/// A simplestreams products file.
#[derive(Debug, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    products: HashMap<String, super::Product>,
}

impl Catalog {
    /// Borrow the catalogue entries keyed by their product identifier.
    pub fn products(&self) -> &HashMap<String, super::Product> {
        &self.products
    }

    /// Flatten the catalogue into one image per product: the newest version
    /// that carries at least one usable fingerprint.
    pub fn images(&self) -> Vec<StreamImage> {
        let mut images: Vec<StreamImage> = self
            .products()
            .iter()
            .filter_map(|(product_id, product)| product.latest_image(product_id))
            .collect();
        images.sort_by(|a, b| a.product_id().cmp(b.product_id()));
        images
    }
}
