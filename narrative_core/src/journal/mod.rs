//! Journal - the append-only output record of a story.
//!
//! Records are never mutated or removed. Every append gets the next `seq`,
//! and `markers` remembers the highest `seq` written to each channel since
//! the last step began, so "what changed this turn" never rescans history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use story_graph::Uid;

/// Channel carrying the per-step marker records.
pub const UPDATE_CHANNEL: &str = "update";
pub const CONTENT_CHANNEL: &str = "content";
pub const CHOICE_CHANNEL: &str = "choice";

/// A unit of journal output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    /// Rendered node content, opaque to the core.
    Content { source: Uid, text: String },
    /// A manual transition offered to the player.
    Choice {
        edge: Uid,
        label: String,
        active: bool,
        unavailable_reason: Option<String>,
    },
    /// Start of a step.
    Marker { step: u64 },
}

impl Fragment {
    pub fn content(source: Uid, text: impl Into<String>) -> Self {
        Fragment::Content {
            source,
            text: text.into(),
        }
    }

    /// Default channel for this kind of fragment.
    pub fn channel(&self) -> &'static str {
        match self {
            Fragment::Content { .. } => CONTENT_CHANNEL,
            Fragment::Choice { .. } => CHOICE_CHANNEL,
            Fragment::Marker { .. } => UPDATE_CHANNEL,
        }
    }

    /// Text of a content fragment.
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::Content { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_active_choice(&self) -> bool {
        matches!(self, Fragment::Choice { active: true, .. })
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    /// Step during which the record was written.
    pub step: u64,
    pub channel: String,
    pub fragment: Fragment,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    records: Vec<Record>,
    next_seq: u64,
    step: u64,
    markers: BTreeMap<String, u64>,
}

impl Journal {
    /// Create a new empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment on its default channel. Returns its `seq`.
    pub fn append(&mut self, fragment: Fragment) -> u64 {
        let channel = fragment.channel();
        self.append_to(channel, fragment)
    }

    /// Append a fragment on an explicit channel. Returns its `seq`.
    pub fn append_to(&mut self, channel: impl Into<String>, fragment: Fragment) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let channel = channel.into();
        self.markers.insert(channel.clone(), seq);
        self.records.push(Record {
            seq,
            step: self.step,
            channel,
            fragment,
        });
        seq
    }

    /// Append fragments in order. Returns the `seq` of each.
    pub fn extend(&mut self, fragments: impl IntoIterator<Item = Fragment>) -> Vec<u64> {
        fragments
            .into_iter()
            .map(|fragment| self.append(fragment))
            .collect()
    }

    /// Start a new step: reset the markers and write an `update` marker.
    pub fn begin_step(&mut self, step: u64) -> u64 {
        self.step = step;
        self.markers.clear();
        self.append(Fragment::Marker { step })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Highest `seq` written to `channel` since the current step began.
    pub fn marker(&self, channel: &str) -> Option<u64> {
        self.markers.get(channel).copied()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    /// Most recent content fragment.
    pub fn last_content(&self) -> Option<&str> {
        self.records.iter().rev().find_map(|r| r.fragment.text())
    }

    /// Records with `seq` strictly greater than `seq`.
    pub fn records_since(&self, seq: u64) -> &[Record] {
        let start = self.records.partition_point(|r| r.seq <= seq);
        &self.records[start..]
    }

    /// Records written since the current step's marker, excluding the marker.
    pub fn current_step_records(&self) -> &[Record] {
        let marker = self
            .records
            .iter()
            .rposition(|r| r.channel == UPDATE_CHANNEL && matches!(r.fragment, Fragment::Marker { .. }));
        match marker {
            Some(index) => &self.records[index + 1..],
            None => &self.records,
        }
    }

    pub fn channel<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records.iter().filter(move |r| r.channel == channel)
    }

    /// Records written during `step`.
    pub fn step_records(&self, step: u64) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.step == step)
    }
}
