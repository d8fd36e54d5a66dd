//! Property cleaning.
//!
//! Storage providers synthesize transport and bookkeeping properties
//! (checksums, sizes, HTTP caching headers) that differ between backends even
//! when the content is identical. Those keys are stripped before properties
//! are compared or copied, so reconciliation only acts on operator-set
//! metadata.

use crate::storage::{
    ContentProperties, PROP_CONTENT_CHECKSUM, PROP_CONTENT_MD5, PROP_CONTENT_MODIFIED,
    PROP_CONTENT_SIZE,
};

const HTTP_HEADERS: [&str; 5] = [
    "Content-Length",
    "Content-Type",
    "Last-Modified",
    "Date",
    "ETag",
];

/// Removes provider-synthesized keys in place.
pub fn clean_properties(properties: &mut ContentProperties) {
    properties.remove(PROP_CONTENT_MD5);
    properties.remove(PROP_CONTENT_CHECKSUM);
    properties.remove(PROP_CONTENT_MODIFIED);
    properties.remove(PROP_CONTENT_SIZE);

    for header in HTTP_HEADERS {
        properties.remove(header);
        properties.remove(&header.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> ContentProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn strips_synthesized_and_http_keys() {
        let mut properties = props(&[
            ("content-checksum", "abc"),
            ("content-md5", "abc"),
            ("content-size", "42"),
            ("content-modified", "2024-06-01"),
            ("Content-Length", "42"),
            ("content-length", "42"),
            ("Content-Type", "text/plain"),
            ("Last-Modified", "yesterday"),
            ("Date", "today"),
            ("ETag", "xyz"),
            ("etag", "xyz"),
            ("owner", "acme"),
            ("content-mimetype", "text/plain"),
        ]);

        clean_properties(&mut properties);

        assert_eq!(
            properties,
            props(&[("owner", "acme"), ("content-mimetype", "text/plain")])
        );
    }

    #[test]
    fn cleaned_copies_of_equivalent_items_compare_equal() {
        let mut on_source = props(&[("owner", "acme"), ("ETag", "source-etag")]);
        let mut on_dest = props(&[("owner", "acme"), ("ETag", "dest-etag")]);

        clean_properties(&mut on_source);
        clean_properties(&mut on_dest);
        assert_eq!(on_source, on_dest);
    }
}
