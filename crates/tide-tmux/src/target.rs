//! Tmux pane addressing.

use std::fmt;
use std::str::FromStr;

use crate::error::TmuxError;

/// A pane address accepted by `tmux -t`.
///
/// The hook reports `<session>:<window>.<pane>`, falling back to the raw
/// `$TMUX_PANE` id (`%42`) when tmux could not be queried.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TmuxTarget {
    Pane {
        session: String,
        window: u32,
        pane: u32,
    },
    PaneId(u32),
}

impl TmuxTarget {
    pub fn pane(session: impl Into<String>, window: u32, pane: u32) -> Self {
        Self::Pane {
            session: session.into(),
            window,
            pane,
        }
    }
}

impl FromStr for TmuxTarget {
    type Err = TmuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TmuxError::InvalidTarget(s.to_string());
        let s = s.trim();

        if let Some(id) = s.strip_prefix('%') {
            return id.parse().map(Self::PaneId).map_err(|_| invalid());
        }

        // Session names may themselves contain ':' so split from the right.
        let (session, rest) = s.rsplit_once(':').ok_or_else(invalid)?;
        let (window, pane) = rest.split_once('.').ok_or_else(invalid)?;
        if session.is_empty() {
            return Err(invalid());
        }

        Ok(Self::Pane {
            session: session.to_string(),
            window: window.parse().map_err(|_| invalid())?,
            pane: pane.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for TmuxTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pane {
                session,
                window,
                pane,
            } => write!(f, "{session}:{window}.{pane}"),
            Self::PaneId(id) => write!(f, "%{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_target() {
        let target: TmuxTarget = "work:2.1".parse().unwrap();
        assert_eq!(target, TmuxTarget::pane("work", 2, 1));
        assert_eq!(target.to_string(), "work:2.1");
    }

    #[test]
    fn test_parse_pane_id() {
        let target: TmuxTarget = "%42".parse().unwrap();
        assert_eq!(target, TmuxTarget::PaneId(42));
        assert_eq!(target.to_string(), "%42");
    }

    #[test]
    fn test_session_name_with_colon() {
        let target: TmuxTarget = "a:b:0.3".parse().unwrap();
        assert_eq!(target, TmuxTarget::pane("a:b", 0, 3));
    }

    #[test]
    fn test_invalid_targets() {
        for bad in ["", "main", "main:1", ":1.0", "main:x.0", "%abc"] {
            assert!(bad.parse::<TmuxTarget>().is_err(), "{bad} should not parse");
        }
    }
}
