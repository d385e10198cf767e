//! List-request parameter parsing.
//!
//! List endpoints take their parameters in bracket notation:
//! `filters[<field>][operator]`, `filters[<field>][value]`, plus `sort_by`,
//! `sort_order`, `page`, `per_page` and `with`. Axum hands us the decoded
//! query pairs; the bracket keys are unpacked here.

/// Hard ceiling on page size, regardless of what the request asks for.
pub const MAX_PER_PAGE: u32 = 500;
/// Page size when the request does not specify one.
pub const DEFAULT_PER_PAGE: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One requested filter, before validation. `operator` defaults to `=` when
/// only a value was supplied.
#[derive(Debug, Clone, Default)]
pub struct FilterClause {
    pub operator: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListParams {
    /// Requested filters in first-appearance order.
    pub filters: Vec<(String, FilterClause)>,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub page: u32,
    pub per_page: u32,
    /// Relation names requested for eager loading (comma-split, trimmed).
    pub with: Vec<String>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort_by: None,
            sort_order: SortOrder::Asc,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            with: Vec::new(),
        }
    }
}

impl ListParams {
    /// Build params from decoded query pairs.
    ///
    /// Unparseable `page`/`per_page` values fall back to their defaults;
    /// `per_page` is clamped to [`MAX_PER_PAGE`]. Malformed bracket keys are
    /// ignored — filter *content* is validated later against the schema.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut params = ListParams::default();

        for (key, value) in pairs {
            match key.as_str() {
                "sort_by" => params.sort_by = Some(value.clone()),
                "sort_order" => {
                    if value.eq_ignore_ascii_case("desc") {
                        params.sort_order = SortOrder::Desc;
                    }
                }
                "page" => {
                    if let Ok(n) = value.parse::<u32>() {
                        params.page = n.max(1);
                    }
                }
                "per_page" => {
                    if let Ok(n) = value.parse::<u32>() {
                        params.per_page = n.clamp(1, MAX_PER_PAGE);
                    }
                }
                "with" => {
                    params.with = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                _ => {
                    if let Some((field, part)) = parse_filter_key(key) {
                        let clause = params.filter_entry(field);
                        match part {
                            "operator" => clause.operator = Some(value.to_lowercase()),
                            "value" => clause.value = Some(value.clone()),
                            _ => {}
                        }
                    }
                }
            }
        }

        params
    }

    fn filter_entry(&mut self, field: &str) -> &mut FilterClause {
        if let Some(pos) = self.filters.iter().position(|(f, _)| f == field) {
            return &mut self.filters[pos].1;
        }
        self.filters
            .push((field.to_string(), FilterClause::default()));
        let last = self.filters.len() - 1;
        &mut self.filters[last].1
    }

    /// Row offset for the current page. Widened to `i64` so large page
    /// numbers cannot overflow before binding.
    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

/// Split `filters[<field>][<part>]` into `(field, part)`.
fn parse_filter_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("filters[")?;
    let close = rest.find(']')?;
    let field = &rest[..close];
    let part = rest[close + 1..]
        .strip_prefix('[')?
        .strip_suffix(']')?;
    if field.is_empty() {
        return None;
    }
    Some((field, part))
}
