use crate::error::QueryError;

pub trait CompanyExtractor {
    fn extract(&self, query: &str) -> Result<String, QueryError>;
}

/// Substring match against a fixed set of company names. The longest name
/// found in the query wins; two different names of that length are ambiguous.
#[derive(Debug, Clone, Default)]
pub struct KnownCompanies {
    names: Vec<String>,
}

impl KnownCompanies {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .map(|name: String| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort_unstable();
        names.dedup();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl CompanyExtractor for KnownCompanies {
    fn extract(&self, query: &str) -> Result<String, QueryError> {
        let lowered = query.to_lowercase();
        let found: Vec<&String> = self
            .names
            .iter()
            .filter(|name| lowered.contains(&name.to_lowercase()))
            .collect();

        let Some(longest) = found.iter().map(|name| name.chars().count()).max() else {
            return Err(QueryError::UnrecognizedCompany(query.to_string()));
        };
        let best: Vec<&String> = found
            .into_iter()
            .filter(|name| name.chars().count() == longest)
            .collect();

        match best.as_slice() {
            [only] => Ok((*only).clone()),
            many => Err(QueryError::AmbiguousCompany(
                many.iter().map(|name| (*name).clone()).collect(),
            )),
        }
    }
}
