//! Category and image filtering rules.

/// Fragments that make a category unsuitable for filing a job
const GENERIC_CATEGORY_WORDS: &[&str] = &["real-world", "disambiguation", "date", "fictional"];

/// Job category used when no page category qualifies
pub const FALLBACK_CATEGORY: &str = "Uncategorized";

/// Page categories that appear in `exclude`
pub fn excluded_by<'a>(categories: &'a [String], exclude: &[String]) -> Vec<&'a str> {
    categories
        .iter()
        .filter(|c| exclude.iter().any(|e| e == *c))
        .map(String::as_str)
        .collect()
}

/// An empty include list admits everything
pub fn matches_include(categories: &[String], include: &[String]) -> bool {
    include.is_empty() || categories.iter().any(|c| include.contains(c))
}

/// First category, in sorted order, that is specific enough to file the job under
pub fn folder_category(categories: &[String], avoid: &[String], exclude: &[String]) -> String {
    let mut sorted: Vec<&String> = categories.iter().collect();
    sorted.sort();

    sorted
        .into_iter()
        .find(|cat| {
            let lower = cat.to_lowercase();
            !avoid.contains(*cat)
                && !exclude.contains(*cat)
                && !GENERIC_CATEGORY_WORDS.iter().any(|w| lower.contains(w))
        })
        .cloned()
        .unwrap_or_else(|| FALLBACK_CATEGORY.to_string())
}

/// Drop decorative and vector images, keeping article order
pub fn filter_image_titles(titles: &[String], exclude_keywords: &[String]) -> Vec<String> {
    let keywords: Vec<String> = exclude_keywords.iter().map(|k| k.to_lowercase()).collect();

    titles
        .iter()
        .filter(|title| {
            let lower = title.to_lowercase();
            !lower.ends_with(".svg") && !keywords.iter().any(|k| lower.contains(k.as_str()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exclusion_and_inclusion() {
        let categories = list(&["Jedi Masters", "Real-world people"]);
        let exclude = list(&["Real-world people", "Dates"]);

        assert_eq!(excluded_by(&categories, &exclude), vec!["Real-world people"]);
        assert!(excluded_by(&list(&["Jedi Masters"]), &exclude).is_empty());

        assert!(matches_include(&categories, &[]));
        assert!(matches_include(&categories, &list(&["Jedi Masters"])));
        assert!(!matches_include(&categories, &list(&["Droids"])));
    }

    #[test]
    fn test_folder_category_skips_generic() {
        let categories = list(&["Legends articles", "Individuals of unidentified date", "Jedi Masters", "Dagobah residents"]);
        let avoid = list(&["Legends articles"]);

        assert_eq!(folder_category(&categories, &avoid, &[]), "Dagobah residents");
        assert_eq!(folder_category(&list(&["Legends articles"]), &avoid, &[]), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_filter_image_titles() {
        let titles = list(&["File:Yoda SWSB.png", "File:Premium-logo.png", "File:Jedi emblem.svg", "File:Planet-stub.jpg", "File:Dagobah.jpg"]);
        let keywords = list(&["logo", "stub"]);

        assert_eq!(
            filter_image_titles(&titles, &keywords),
            list(&["File:Yoda SWSB.png", "File:Dagobah.jpg"])
        );
    }
}
