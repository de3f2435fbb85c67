//! Named locator catalog
//!
//! Scenarios refer to elements either inline (`"id:username"`) or by name
//! (`login.username`). Names resolve through this catalog, which is built
//! once at startup from the built-in defaults plus `[locators]` in config.
//! Unknown names are an error, never a fallback.

use std::collections::BTreeMap;

use crate::backend::Locator;
use crate::error::{E2eError, E2eResult};

const BUILTIN: &[(&str, &str)] = &[
    ("login.username", "id:username"),
    ("login.password", "id:password"),
    ("login.submit", "id:submitbtn"),
    (
        "login.error_message",
        "xpath://div[contains(@class, 'error-message') or contains(@class, 'alert-danger')]",
    ),
    (
        "nav.logout",
        "xpath://button[contains(text(),'Logout')] | //a[contains(text(),'Logout')]",
    ),
    ("page.title", "xpath://h1 | //h2[contains(@class,'page-title')]"),
];

#[derive(Debug, Clone, Default)]
pub struct LocatorCatalog {
    entries: BTreeMap<String, Locator>,
}

impl LocatorCatalog {
    /// Built-in names only
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .filter_map(|(name, spec)| Locator::parse(spec).ok().map(|l| (name.to_string(), l)))
            .collect();
        Self { entries }
    }

    /// Built-in names overlaid with configured `name = "<strategy>:<value>"` pairs
    pub fn from_config(configured: &BTreeMap<String, String>) -> E2eResult<Self> {
        let mut catalog = Self::builtin();
        for (name, spec) in configured {
            let locator = Locator::parse(spec).map_err(|_| {
                E2eError::InvalidLocator(format!("{} = \"{}\"", name, spec))
            })?;
            catalog.entries.insert(name.clone(), locator);
        }
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> E2eResult<&Locator> {
        self.entries
            .get(name)
            .ok_or_else(|| E2eError::UnknownLocator(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Fail on the first name that does not resolve
    pub fn validate<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> E2eResult<()> {
        for name in names {
            self.get(name)?;
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_login_locators() {
        let catalog = LocatorCatalog::builtin();
        assert_eq!(catalog.len(), BUILTIN.len());
        assert_eq!(
            catalog.get("login.submit").unwrap(),
            &Locator::Id("submitbtn".to_string())
        );
    }

    #[test]
    fn test_config_overrides_and_extends() {
        let mut configured = BTreeMap::new();
        configured.insert("login.submit".to_string(), "css:button[type=submit]".to_string());
        configured.insert("dashboard.tile".to_string(), "xpath://h5".to_string());
        let catalog = LocatorCatalog::from_config(&configured).unwrap();

        assert_eq!(
            catalog.get("login.submit").unwrap(),
            &Locator::Css("button[type=submit]".to_string())
        );
        assert!(catalog.contains("dashboard.tile"));
    }

    #[test]
    fn test_invalid_entry_fails_fast() {
        let mut configured = BTreeMap::new();
        configured.insert("broken".to_string(), "submitbtn".to_string());
        let err = LocatorCatalog::from_config(&configured).unwrap_err();
        assert!(matches!(err, E2eError::InvalidLocator(_)));
    }

    #[test]
    fn test_unknown_name() {
        let catalog = LocatorCatalog::builtin();
        assert!(matches!(
            catalog.get("login.usernmae"),
            Err(E2eError::UnknownLocator(name)) if name == "login.usernmae"
        ));
        assert!(catalog.validate(["login.username", "nope"]).is_err());
        assert!(catalog.validate(["login.username", "login.password"]).is_ok());
    }
}
