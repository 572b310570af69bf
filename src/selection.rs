//! Row selection over the product table
//!
//! The selection only stores ids. It is intersected with the current product
//! list on every read, so ids left over from an earlier import never leak
//! into a label job.

use crate::catalog::Product;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: HashSet<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Raw number of stored ids, stale ones included
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Check or uncheck a single row
    pub fn set(&mut self, id: &str, checked: bool) {
        if checked {
            self.ids.insert(id.to_string());
        } else {
            self.ids.remove(id);
        }
    }

    /// Replace the selection with every visible row
    pub fn select_all(&mut self, visible: &[Product]) {
        self.ids = visible.iter().map(|p| p.id.clone()).collect();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Select exactly the visible rows that are not currently selected.
    /// Selected rows hidden by the current filter are dropped.
    pub fn invert(&mut self, visible: &[Product]) {
        self.ids = visible
            .iter()
            .filter(|p| !self.ids.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
    }

    /// Whether every visible row is selected (false when nothing is visible)
    pub fn all_selected(&self, visible: &[Product]) -> bool {
        !visible.is_empty() && visible.iter().all(|p| self.ids.contains(&p.id))
    }

    /// Selected products from the current list, in list order
    pub fn resolve(&self, products: &[Product]) -> Vec<Product> {
        products
            .iter()
            .filter(|p| self.ids.contains(&p.id))
            .cloned()
            .collect()
    }

    /// Number of selected ids that exist in the current list
    pub fn count_in(&self, products: &[Product]) -> usize {
        products.iter().filter(|p| self.ids.contains(&p.id)).count()
    }

    /// Drop ids that no longer reference a product in `products`
    pub fn retain_known(&mut self, products: &[Product]) {
        let known: HashSet<&str> = products.iter().map(|p| p.id.as_str()).collect();
        self.ids.retain(|id| known.contains(id.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[&str]) -> Vec<Product> {
        ids.iter().map(|id| Product::new(id, &format!("product {}", id))).collect()
    }

    fn resolved_ids(selection: &Selection, products: &[Product]) -> Vec<String> {
        selection.resolve(products).into_iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_set_and_unset() {
        let mut selection = Selection::new();
        selection.set("a", true);
        selection.set("b", true);
        selection.set("a", false);

        assert!(!selection.contains("a"));
        assert!(selection.contains("b"));
        assert_eq!(selection.len(), 1);
    }

    #[test]
    fn test_select_all_and_clear() {
        let products = rows(&["a", "b", "c"]);
        let mut selection = Selection::new();

        selection.select_all(&products[..2]);
        assert!(selection.all_selected(&products[..2]));
        assert!(!selection.all_selected(&products));

        selection.clear();
        assert!(selection.is_empty());
    }

    #[test]
    fn test_all_selected_is_false_for_empty_view() {
        let selection = Selection::from_ids(["a"]);
        assert!(!selection.all_selected(&[]));
    }

    #[test]
    fn test_invert_within_visible_rows() {
        let products = rows(&["a", "b", "c", "d"]);
        let visible = &products[..3];
        let mut selection = Selection::from_ids(["a", "d"]);

        selection.invert(visible);

        assert_eq!(resolved_ids(&selection, &products), vec!["b", "c"]);
    }

    #[test]
    fn test_resolve_ignores_stale_ids_and_keeps_list_order() {
        let products = rows(&["x", "y", "z"]);
        let selection = Selection::from_ids(["z", "old-1", "x"]);

        assert_eq!(resolved_ids(&selection, &products), vec!["x", "z"]);
        assert_eq!(selection.count_in(&products), 2);
        assert_eq!(selection.len(), 3);
    }

    #[test]
    fn test_retain_known_after_reimport() {
        let mut selection = Selection::from_ids(["a", "b"]);
        let reimported = rows(&["b", "c"]);

        selection.retain_known(&reimported);

        assert!(!selection.contains("a"));
        assert!(selection.contains("b"));
        assert_eq!(selection.len(), 1);
    }
}
