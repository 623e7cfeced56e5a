use crate::FilterMateError;

pub(crate) fn is_missing_relation_error(err: &FilterMateError) -> bool {
    let lower = err.description.to_lowercase();
    lower.contains("no such table")
        || lower.contains("relation")
            && (lower.contains("does not exist")
                || lower.contains("undefined table")
                || lower.contains("unknown"))
}

#[cfg(test)]
mod tests {
    use super::is_missing_relation_error;
    use crate::FilterMateError;

    #[test]
    fn classifies_missing_relation_messages() {
        assert!(is_missing_relation_error(&FilterMateError::unknown(
            "no such table: fm_subset_history"
        )));
        assert!(is_missing_relation_error(&FilterMateError::unknown(
            "ERROR: relation \"filtermate_temp.fm_temp_mv_ab12cd34_0011aabb\" does not exist"
        )));
        assert!(!is_missing_relation_error(&FilterMateError::unknown(
            "canceling statement due to statement timeout"
        )));
    }
}
