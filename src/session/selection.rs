use std::collections::HashSet;

/// Ids checked for bulk action. Only ever holds ids from the loaded list.
#[derive(Debug, Default)]
pub struct SelectionSet {
    ids: HashSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one id. Returns whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn toggle_all<'a>(&mut self, checked: bool, loaded: impl Iterator<Item = &'a str>) {
        self.ids.clear();
        if checked {
            self.ids.extend(loaded.map(str::to_string));
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_all_selected(&self, loaded_len: usize) -> bool {
        loaded_len > 0 && self.ids.len() == loaded_len
    }

    pub fn is_partially_selected(&self, loaded_len: usize) -> bool {
        !self.ids.is_empty() && self.ids.len() < loaded_len
    }

    pub fn remove_all(&mut self, ids: &[String]) {
        for id in ids {
            self.ids.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Selected ids in list order.
    pub fn ordered<'a>(&self, loaded: impl Iterator<Item = &'a str>) -> Vec<String> {
        loaded
            .filter(|id| self.ids.contains(*id))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOADED: [&str; 3] = ["3", "5", "7"];

    #[test]
    fn test_toggle_and_tristate() {
        let mut sel = SelectionSet::new();
        assert!(!sel.is_all_selected(3));
        assert!(!sel.is_partially_selected(3));

        assert!(sel.toggle("7"));
        assert!(sel.toggle("3"));
        assert!(sel.is_partially_selected(3));
        assert_eq!(sel.ordered(LOADED.iter().copied()), vec!["3", "7"]);

        assert!(!sel.toggle("7"));
        assert_eq!(sel.count(), 1);
    }

    #[test]
    fn test_toggle_all() {
        let mut sel = SelectionSet::new();
        sel.toggle_all(true, LOADED.iter().copied());
        assert_eq!(sel.count(), 3);
        assert!(sel.is_all_selected(3));
        assert!(!sel.is_partially_selected(3));

        sel.toggle_all(false, LOADED.iter().copied());
        assert_eq!(sel.count(), 0);
    }

    #[test]
    fn test_empty_list_is_never_all_selected() {
        let mut sel = SelectionSet::new();
        sel.toggle_all(true, std::iter::empty());
        assert!(!sel.is_all_selected(0));
    }

    #[test]
    fn test_remove_all() {
        let mut sel = SelectionSet::new();
        sel.toggle_all(true, LOADED.iter().copied());
        sel.remove_all(&["3".to_string(), "9".to_string()]);
        assert!(!sel.contains("3"));
        assert_eq!(sel.count(), 2);
    }
}
