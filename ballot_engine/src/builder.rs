pub use crate::config::*;

use snafu::prelude::*;

/// A builder for assembling a ballot, one position at a time.
///
/// The builder catches the mistakes a client can make before anything reaches the database:
/// two lines for the same position, or a position that is not on the ballot. Whether the
/// chosen candidates are approved is checked when the ballot is cast.
///
/// ```
/// use ballot_engine::builder::Builder;
/// # use ballot_engine::EngineError;
///
/// let mut builder = Builder::new().positions(&["chair".to_string(), "treasurer".to_string()]);
///
/// builder.choose("chair", "cand-alice")?;
/// assert_eq!(builder.missing(), vec!["treasurer".to_string()]);
/// builder.abstain("treasurer")?;
///
/// let selections = builder.build();
/// assert_eq!(selections.len(), 2);
/// # Ok::<(), EngineError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    pub(crate) _positions: Option<Vec<String>>,
    pub(crate) _selections: Vec<Selection>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Restricts the ballot to the given positions. Without it any position id is accepted.
    pub fn positions(self, ids: &[String]) -> Builder {
        Builder {
            _positions: Some(ids.to_vec()),
            _selections: self._selections,
        }
    }

    /// Votes for `candidate_id` in `position_id`.
    pub fn choose(&mut self, position_id: &str, candidate_id: &str) -> EngineResult<()> {
        self.add_selection(&Selection {
            position_id: position_id.to_string(),
            candidate_id: Some(candidate_id.to_string()),
        })
    }

    /// Leaves `position_id` blank. This still counts as a line of the ballot.
    pub fn abstain(&mut self, position_id: &str) -> EngineResult<()> {
        self.add_selection(&Selection {
            position_id: position_id.to_string(),
            candidate_id: None,
        })
    }

    pub fn add_selection(&mut self, sel: &Selection) -> EngineResult<()> {
        if let Some(known) = self._positions.as_deref() {
            ensure!(
                known.iter().any(|p| *p == sel.position_id),
                ValidationSnafu {
                    message: format!("Position {} is not on this ballot", sel.position_id)
                }
            );
        }
        ensure!(
            !self
                ._selections
                .iter()
                .any(|s| s.position_id == sel.position_id),
            ValidationSnafu {
                message: format!("More than one vote for position {}", sel.position_id)
            }
        );
        self._selections.push(sel.clone());
        Ok(())
    }

    /// Positions declared with [`Builder::positions`] that have no line yet.
    pub fn missing(&self) -> Vec<String> {
        match self._positions.as_deref() {
            Some(known) => known
                .iter()
                .filter(|p| !self._selections.iter().any(|s| s.position_id == **p))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn build(self) -> Vec<Selection> {
        self._selections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_positions_are_refused() {
        let mut b = Builder::new();
        b.choose("chair", "x").unwrap();
        let err = b.abstain("chair").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(b.build().len(), 1);
    }

    #[test]
    fn unknown_positions_are_refused() {
        let mut b = Builder::new().positions(&["chair".to_string()]);
        assert!(b.choose("janitor", "x").is_err());
        assert_eq!(b.missing(), vec!["chair".to_string()]);
        b.abstain("chair").unwrap();
        assert!(b.missing().is_empty());
        assert_eq!(
            b.build(),
            vec![Selection {
                position_id: "chair".to_string(),
                candidate_id: None
            }]
        );
    }
}
