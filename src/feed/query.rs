use url::Url;

/// Builds the arXiv `search_query` expression for a comma-separated category list.
///
/// Each category becomes `cat:<category>` and the filters are joined with ` OR `.
/// Surrounding whitespace is trimmed and blank entries are skipped, so an empty
/// list yields an empty expression (which the API treats as "match all").
pub fn build_category_query(categories: &str) -> String {
    categories
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Query parameters for one feed request.
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub base_url: String,
    pub max_results: u32,
    pub categories: String,
}

impl FeedQuery {
    /// The full request URL, newest updates first.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.base_url)?;
        url.query_pairs_mut()
            .append_pair("sortBy", "lastUpdatedDate")
            .append_pair("sortOrder", "descending")
            .append_pair("max_results", &self.max_results.to_string())
            .append_pair("search_query", &build_category_query(&self.categories));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_categories_joined_with_or() {
        assert_eq!(build_category_query("cs.AI,cs.LG"), "cat:cs.AI OR cat:cs.LG");
    }

    #[test]
    fn test_empty_list_matches_all() {
        assert_eq!(build_category_query(""), "");
    }

    #[test]
    fn test_single_category() {
        assert_eq!(build_category_query("math.CO"), "cat:math.CO");
    }

    #[test]
    fn test_whitespace_and_blank_entries_ignored() {
        assert_eq!(
            build_category_query(" cs.AI , ,cs.LG,"),
            "cat:cs.AI OR cat:cs.LG"
        );
        assert_eq!(build_category_query(" , "), "");
    }

    #[test]
    fn test_url_carries_sort_and_search_params() {
        let query = FeedQuery {
            base_url: "http://export.arxiv.org/api/query".to_string(),
            max_results: 25,
            categories: "cs.AI,cs.LG".to_string(),
        };
        let url = query.url().unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(url.path(), "/api/query");
        assert_eq!(
            pairs,
            vec![
                ("sortBy".to_string(), "lastUpdatedDate".to_string()),
                ("sortOrder".to_string(), "descending".to_string()),
                ("max_results".to_string(), "25".to_string()),
                (
                    "search_query".to_string(),
                    "cat:cs.AI OR cat:cs.LG".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let query = FeedQuery {
            base_url: "not a url".to_string(),
            max_results: 10,
            categories: String::new(),
        };
        assert!(query.url().is_err());
    }

    proptest! {
        #[test]
        fn prop_one_filter_per_category(cats in proptest::collection::vec("[a-z]{2,4}\\.[A-Z]{2}", 0..6)) {
            let query = build_category_query(&cats.join(","));
            let filters: Vec<&str> = if query.is_empty() {
                Vec::new()
            } else {
                query.split(" OR ").collect()
            };
            prop_assert_eq!(filters.len(), cats.len());
            for (filter, cat) in filters.iter().zip(&cats) {
                prop_assert_eq!(*filter, format!("cat:{cat}"));
            }
        }
    }
}
