//! Search and batch filtering over the product list
//!
//! Batch selection is applied first as a hard filter. The search term then
//! matches, case-insensitively and ignoring whitespace, as a substring of the
//! name, order number, product code or quantity. The batch label is special:
//! an all-digit search must equal one whole number in the label, so `123`
//! finds "Batch 123" but not "Batch 1234".

use crate::catalog::Product;
use std::collections::BTreeSet;

/// Lowercase and strip all whitespace
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Runs of ASCII digits in `s`
fn digit_runs(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_ascii_digit()).filter(|run| !run.is_empty())
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    /// Normalized search term
    search: String,
    numeric: bool,
    batches: BTreeSet<String>,
}

impl ProductFilter {
    /// An empty `batches` set disables batch filtering.
    pub fn new(search: &str, batches: BTreeSet<String>) -> Self {
        let search = normalize(search);
        let numeric = is_all_digits(&search);
        Self {
            search,
            numeric,
            batches,
        }
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn batches(&self) -> &BTreeSet<String> {
        &self.batches
    }

    pub fn matches(&self, product: &Product) -> bool {
        if !self.batches.is_empty() && !self.batches.contains(&product.remarks) {
            return false;
        }

        let needle = self.search.as_str();
        normalize(&product.product_name).contains(needle)
            || normalize(&product.order_number).contains(needle)
            || normalize(&product.product_code).contains(needle)
            || self.remarks_match(&product.remarks)
            || normalize(&product.quantity_text()).contains(needle)
    }

    fn remarks_match(&self, remarks: &str) -> bool {
        if remarks.is_empty() {
            return false;
        }
        if self.numeric {
            return digit_runs(remarks).any(|run| run == self.search);
        }
        normalize(remarks).contains(self.search.as_str())
    }

    /// Matching products, in list order
    pub fn apply(&self, products: &[Product]) -> Vec<Product> {
        products.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

/// Filter `products` by search term and batch selection
pub fn filter_products(products: &[Product], search: &str, batches: &BTreeSet<String>) -> Vec<Product> {
    ProductFilter::new(search, batches.clone()).apply(products)
}
