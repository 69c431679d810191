/// Whether the attempt may move from question `from` to question `to`.
///
/// With `cant_go_back` set only forward moves (or staying put) are allowed.
/// Range checking is the caller's job.
pub fn can_navigate(from: usize, to: usize, cant_go_back: bool) -> bool {
    !cant_go_back || to >= from
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_navigation_allows_everything() {
        for from in 0..5 {
            for to in 0..5 {
                assert!(can_navigate(from, to, false));
            }
        }
    }

    #[test]
    fn test_forward_only() {
        assert!(!can_navigate(3, 1, true));
        assert!(can_navigate(3, 3, true));
        assert!(can_navigate(3, 5, true));
        assert!(can_navigate(0, 0, true));
    }
}
