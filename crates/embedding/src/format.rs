//! The prompt formatting contract. These strings are part of the on-disk
//! contract: stored vectors were produced from them, so any change
//! invalidates every embedding and requires `clear_all_embeddings`.

pub fn format_query(text: &str) -> String {
    format!("task: search result | query: {text}")
}

pub fn format_document(text: &str) -> String {
    format!("title: none | text: {text}")
}

#[cfg(test)]
mod tests {
    use super::{format_document, format_query};

    #[test]
    fn query_format_is_stable() {
        assert_eq!(
            format_query("hello world"),
            "task: search result | query: hello world"
        );
    }

    #[test]
    fn document_format_is_stable() {
        assert_eq!(format_document("body text"), "title: none | text: body text");
    }
}
