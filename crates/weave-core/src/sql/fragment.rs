use crate::value::Value;

/// A piece of SQL together with the values bound to its placeholders.
///
/// Fragments are rendered at a known start index and concatenated left to
/// right, so placeholder numbers never collide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Fragment {
            sql: sql.into(),
            params,
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Fragment::new(sql, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Index of the first placeholder after this fragment, given the one it
    /// was rendered at.
    pub fn next_index(&self, start: usize) -> usize {
        start + self.params.len()
    }

    pub fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn append(&mut self, other: Fragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_tracks_params() {
        let mut f = Fragment::text("SELECT 1");
        f.append(Fragment::new(" WHERE x = $1", vec![Value::Int(1)]));
        assert_eq!(f.sql, "SELECT 1 WHERE x = $1");
        assert_eq!(f.next_index(1), 2);
        assert!(!f.is_empty());
    }
}
