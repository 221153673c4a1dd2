//! LiveSplit `.lss` document reading.
//!
//! Pulls the per-segment attempt history out of a splits file: each
//! segment's name plus every `SegmentHistory` entry as an attempt id with
//! a recorded real time or a skip marker.

use std::time::Duration;

use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::time::parse_time;
use crate::SimError;

/// One historical attempt of one segment. `time` is `None` when the split
/// was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    pub id: String,
    pub time: Option<Duration>,
}

/// A segment's name and full attempt history, oldest attempt first.
#[derive(Clone, Debug, Default)]
pub struct SegmentHistory {
    pub name: String,
    pub attempts: Vec<Attempt>,
}

/// Everything the model needs from a splits document.
#[derive(Clone, Debug, Default)]
pub struct RunHistory {
    pub game: Option<String>,
    pub category: Option<String>,
    pub segments: Vec<SegmentHistory>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextTarget {
    None,
    GameName,
    CategoryName,
    SegmentName,
    RealTime,
}

/// Parses a `.lss` document into segment histories.
///
/// Only `RealTime` values directly under a `SegmentHistory` entry count;
/// split-time tables, best-segment blocks, per-attempt game times, and
/// autosplitter settings are skipped over.
pub fn parse_lss(text: &str) -> Result<RunHistory, SimError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut history = RunHistory::default();
    let mut current = SegmentHistory::default();
    let mut in_segments = false;
    let mut in_segment = false;
    let mut in_history = false;
    let mut in_time_entry = false;
    let mut attempt_id: Option<String> = None;
    let mut attempt_time: Option<String> = None;
    let mut target = TextTarget::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => match start.name().as_ref() {
                b"AutoSplitterSettings" => {
                    reader
                        .read_to_end(start.name())
                        .map_err(|err| SimError::MalformedSplits(err.to_string()))?;
                }
                b"Segments" => in_segments = true,
                b"Segment" if in_segments => {
                    in_segment = true;
                    current = SegmentHistory::default();
                }
                b"Name" if in_segment && !in_history => target = TextTarget::SegmentName,
                b"SegmentHistory" if in_segment => in_history = true,
                b"Time" if in_history => {
                    in_time_entry = true;
                    attempt_id = Some(read_id_attr(&start)?);
                    attempt_time = None;
                }
                b"RealTime" if in_time_entry => target = TextTarget::RealTime,
                b"GameName" if !in_segments => target = TextTarget::GameName,
                b"CategoryName" if !in_segments => target = TextTarget::CategoryName,
                _ => {}
            },
            Ok(Event::Empty(empty)) => {
                // A self-closed history entry is an attempt with no time.
                if in_history && empty.name().as_ref() == b"Time" {
                    current.attempts.push(Attempt {
                        id: read_id_attr(&empty)?,
                        time: None,
                    });
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| SimError::MalformedSplits(err.to_string()))?
                    .into_owned();
                match target {
                    TextTarget::GameName => history.game = Some(value),
                    TextTarget::CategoryName => history.category = Some(value),
                    TextTarget::SegmentName => current.name = value,
                    TextTarget::RealTime => attempt_time = Some(value),
                    TextTarget::None => {}
                }
            }
            Ok(Event::End(end)) => match end.name().as_ref() {
                b"Segments" => in_segments = false,
                b"Segment" if in_segment => {
                    in_segment = false;
                    history.segments.push(std::mem::take(&mut current));
                }
                b"SegmentHistory" => in_history = false,
                b"Time" if in_time_entry => {
                    in_time_entry = false;
                    if let Some(id) = attempt_id.take() {
                        let time = match attempt_time.take() {
                            Some(raw) => Some(parse_time(&raw)?),
                            None => None,
                        };
                        current.attempts.push(Attempt { id, time });
                    }
                }
                b"Name" | b"RealTime" | b"GameName" | b"CategoryName" => {
                    target = TextTarget::None
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(SimError::MalformedSplits(err.to_string())),
            _ => {}
        }
    }

    if history.segments.is_empty() {
        return Err(SimError::MalformedSplits(
            "no segments found in document".to_string(),
        ));
    }
    Ok(history)
}

fn read_id_attr(tag: &BytesStart<'_>) -> Result<String, SimError> {
    for attr in tag.attributes() {
        let attr = attr.map_err(|err| SimError::MalformedSplits(err.to_string()))?;
        if attr.key.as_ref() == b"id" {
            let value = attr
                .unescape_value()
                .map_err(|err| SimError::MalformedSplits(err.to_string()))?;
            return Ok(value.into_owned());
        }
    }
    Err(SimError::MalformedSplits(
        "history entry without an id attribute".to_string(),
    ))
}
