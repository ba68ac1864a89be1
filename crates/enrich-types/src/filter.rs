//! Contact selection filters.
//!
//! A filter is always scoped to one owner. Conditions are combined with AND.
//! Blank text and empty embeddings are treated as null.

use serde::{Deserialize, Serialize};

use crate::contact::Contact;

/// Contact fields a condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Name,
    Company,
    Title,
    Bio,
    InvestorNotes,
    Embedding,
}

impl ContactField {
    fn is_set(self, contact: &Contact) -> bool {
        match self {
            ContactField::Name => contact.has_name(),
            ContactField::Company => contact.has_company(),
            ContactField::Title => contact.has_title(),
            ContactField::Bio => contact.has_bio(),
            ContactField::InvestorNotes => contact.has_investor_notes(),
            ContactField::Embedding => contact.has_embedding(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    IsNull(ContactField),
    NotNull(ContactField),
    /// No thesis row exists for the contact
    ThesisMissing,
    /// Contact id is one of the listed ids
    IdIn(Vec<String>),
}

/// Selection over one owner's contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFilter {
    pub owner_id: String,
    pub conditions: Vec<Condition>,
}

impl ContactFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            conditions: Vec::new(),
        }
    }

    pub fn is_null(mut self, field: ContactField) -> Self {
        self.conditions.push(Condition::IsNull(field));
        self
    }

    pub fn not_null(mut self, field: ContactField) -> Self {
        self.conditions.push(Condition::NotNull(field));
        self
    }

    pub fn thesis_missing(mut self) -> Self {
        self.conditions.push(Condition::ThesisMissing);
        self
    }

    pub fn id_in(mut self, ids: Vec<String>) -> Self {
        self.conditions.push(Condition::IdIn(ids));
        self
    }

    /// Ids restriction, if the filter carries one.
    pub fn ids(&self) -> Option<&[String]> {
        self.conditions.iter().find_map(|c| match c {
            Condition::IdIn(ids) => Some(ids.as_slice()),
            _ => None,
        })
    }

    /// Whether the filter needs to know if a thesis exists.
    pub fn needs_thesis_lookup(&self) -> bool {
        self.conditions.contains(&Condition::ThesisMissing)
    }

    /// Evaluate the filter against a contact. `has_thesis` is only consulted
    /// for [`Condition::ThesisMissing`].
    pub fn matches(&self, contact: &Contact, has_thesis: bool) -> bool {
        if contact.owner_id != self.owner_id {
            return false;
        }
        self.conditions.iter().all(|condition| match condition {
            Condition::IsNull(field) => !field.is_set(contact),
            Condition::NotNull(field) => field.is_set(contact),
            Condition::ThesisMissing => !has_thesis,
            Condition::IdIn(ids) => ids.iter().any(|id| *id == contact.id),
        })
    }
}

/// Keyset page: rows strictly after `after`, ordered by id, at most `limit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub after: Option<String>,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }

    pub fn after(after: Option<String>, limit: usize) -> Self {
        Self { after, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_scope_is_mandatory() {
        let filter = ContactFilter::owner("a");
        assert!(filter.matches(&Contact::new("a", "1", "N"), false));
        assert!(!filter.matches(&Contact::new("b", "1", "N"), false));
    }

    #[test]
    fn test_null_conditions() {
        let filter = ContactFilter::owner("a")
            .not_null(ContactField::Name)
            .is_null(ContactField::Bio);

        assert!(filter.matches(&Contact::new("a", "1", "N"), false));
        assert!(filter.matches(&Contact::new("a", "1", "N").with_bio(" "), false));
        assert!(!filter.matches(&Contact::new("a", "1", "N").with_bio("bio"), false));
        assert!(!filter.matches(&Contact::new("a", "1", ""), false));
    }

    #[test]
    fn test_thesis_missing_uses_lookup() {
        let filter = ContactFilter::owner("a").thesis_missing();
        let contact = Contact::new("a", "1", "N");

        assert!(filter.needs_thesis_lookup());
        assert!(filter.matches(&contact, false));
        assert!(!filter.matches(&contact, true));
    }

    #[test]
    fn test_id_in() {
        let filter = ContactFilter::owner("a").id_in(vec!["2".into(), "3".into()]);
        assert_eq!(filter.ids().map(|ids| ids.len()), Some(2));
        assert!(!filter.matches(&Contact::new("a", "1", "N"), false));
        assert!(filter.matches(&Contact::new("a", "3", "N"), false));
    }
}
