//! Error precedence: one error to display out of three independent sources.
//!
//! local (current user action) > domain (note operations) > connectivity
//! (session / validity gate). While the contract is invalid the connectivity
//! error is suppressed; the presentation layer shows a dedicated banner for that.

use crate::error::NotesError;

pub fn resolve_error<'a>(
    local: Option<&'a NotesError>,
    domain: Option<&'a NotesError>,
    connectivity: Option<&'a NotesError>,
    contract_valid: bool,
) -> Option<&'a NotesError> {
    local
        .or(domain)
        .or(if contract_valid { connectivity } else { None })
}

/// The three error sources with their separate lifecycles.
#[derive(Debug, Default, Clone)]
pub struct ErrorBoard {
    local: Option<NotesError>,
    domain: Option<NotesError>,
    connectivity: Option<NotesError>,
}

impl ErrorBoard {
    pub fn set_local(&mut self, err: Option<NotesError>) {
        self.local = err;
    }

    pub fn set_domain(&mut self, err: NotesError) {
        self.domain = Some(err);
    }

    /// Owned by validity re-evaluation; `clear_error` never touches it.
    pub fn set_connectivity(&mut self, err: Option<NotesError>) {
        self.connectivity = err;
    }

    pub fn connectivity(&self) -> Option<&NotesError> {
        self.connectivity.as_ref()
    }

    /// Clears the local and domain sources.
    pub fn clear_error(&mut self) {
        self.local = None;
        self.domain = None;
    }

    pub fn resolve(&self, contract_valid: bool) -> Option<&NotesError> {
        resolve_error(
            self.local.as_ref(),
            self.domain.as_ref(),
            self.connectivity.as_ref(),
            contract_valid,
        )
    }
}
