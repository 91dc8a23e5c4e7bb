//! JSON export of the entry log.
//!
//! Only the compiled boxes are persisted. Grounding, clauses and indexes
//! are recomputed on replay, which keeps the format independent of the
//! engine's internal representation.

use serde::{Deserialize, Serialize};

use crate::drs::DrsBox;
use crate::error::KbError;
use crate::kb::{EntryId, KbState, KnowledgeBase, Provenance};

pub const CURRENT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: EntryId,
    pub active: bool,
    pub provenance: Provenance,
    pub drs: DrsBox,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireExport {
    pub version: u32,
    pub entries: Vec<LogRecord>,
}

/// Every entry, retracted ones included, in id order.
pub fn log_of(kb: &KbState) -> Vec<LogRecord> {
    kb.entries()
        .map(|e| LogRecord {
            id: e.id,
            active: e.active,
            provenance: e.provenance.clone(),
            drs: e.drs.clone(),
        })
        .collect()
}

/// Rebuild a knowledge base from its log.
pub fn replay(log: &[LogRecord]) -> Result<KnowledgeBase, KbError> {
    let mut kb = KnowledgeBase::new();
    for record in log {
        kb.restore(
            record.id,
            record.drs.clone(),
            record.provenance.clone(),
            record.active,
        )?;
    }
    kb.state().check_integrity()?;
    tracing::debug!(entries = log.len(), "log replayed");
    Ok(kb)
}

pub fn export_json(kb: &KbState) -> Result<String, serde_json::Error> {
    let wire = WireExport {
        version: CURRENT_VERSION,
        entries: log_of(kb),
    };
    serde_json::to_string_pretty(&wire)
}

pub fn import_json(json: &str) -> Result<Vec<LogRecord>, serde_json::Error> {
    let wire: WireExport = serde_json::from_str(json)?;
    if wire.version > CURRENT_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported log version {} (newest known is {CURRENT_VERSION})",
            wire.version
        )));
    }
    Ok(wire.entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drs::Compiled;
    use crate::lexicon::Lexicon;
    use crate::semantics::compile;

    fn make_kb() -> KnowledgeBase {
        let lexicon = Lexicon::builtin().unwrap();
        let mut kb = KnowledgeBase::new();
        for (i, text) in ["A farmer owns a donkey.", "He beats it.", "Tom walks."]
            .iter()
            .enumerate()
        {
            let Compiled::Assertion(drs) =
                compile(text, &lexicon, &kb.state().discourse()).unwrap()
            else {
                panic!("not an assertion");
            };
            kb.assert(drs, Provenance::new("farm.txt", i));
        }
        kb.retract(EntryId(3)).unwrap();
        kb
    }

    #[test]
    fn test_export_replays_identically() {
        let kb = make_kb();
        let json = export_json(kb.state()).unwrap();
        let log = import_json(&json).unwrap();
        assert_eq!(log, log_of(kb.state()));

        let replayed = replay(&log).unwrap();
        assert_eq!(replayed.state().stats(), kb.state().stats());
        assert_eq!(replayed.state().domain(), kb.state().domain());
        assert_eq!(replayed.state().next_id(), EntryId(4));
    }

    #[test]
    fn test_version_field() {
        let json = export_json(make_kb().state()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], CURRENT_VERSION);
        assert_eq!(value["entries"][2]["active"], false);
        assert_eq!(value["entries"][0]["provenance"]["source"], "farm.txt");
    }

    #[test]
    fn test_future_version_rejected() {
        assert!(import_json(r#"{"version": 99, "entries": []}"#).is_err());
    }

    #[test]
    fn test_replay_rejects_out_of_order_ids() {
        let mut log = log_of(make_kb().state());
        log.swap(0, 1);
        assert!(matches!(replay(&log), Err(KbError::Inconsistent(_))));
    }
}
