//! Note events produced by the engine

use serde::{Deserialize, Serialize};

/// What produced a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "index", rename_all = "snake_case")]
pub enum EventSource {
    /// Onset trigger table slot
    Onset(usize),
    /// Release trigger table slot
    Release(usize),
    /// Sequencer track
    Track(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    NoteOn,
    NoteOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub source: EventSource,
    pub note: u8,
    pub velocity: u8,
    pub kind: NoteKind,
}

/// Pre-sized event list filled during one block
///
/// Events past the capacity are counted and dropped instead of growing the list.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Vec<NoteEvent>,
    capacity: usize,
    dropped: usize,
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    pub fn push(&mut self, event: NoteEvent) {
        if self.events.len() < self.capacity {
            self.events.push(event);
        } else {
            self.dropped += 1;
        }
    }

    /// Push a note-on immediately followed by its note-off
    pub fn trigger(&mut self, source: EventSource, note: u8, velocity: u8) {
        self.push(NoteEvent {
            source,
            note,
            velocity,
            kind: NoteKind::NoteOn,
        });
        self.push(NoteEvent {
            source,
            note,
            velocity: 0,
            kind: NoteKind::NoteOff,
        });
    }

    pub fn as_slice(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded since the last clear because the buffer was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Note-on events only
    pub fn note_ons(&self) -> impl Iterator<Item = &NoteEvent> {
        self.events.iter().filter(|e| e.kind == NoteKind::NoteOn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_pushes_on_then_off() {
        let mut buffer = EventBuffer::with_capacity(4);
        buffer.trigger(EventSource::Track(2), 42, 100);
        let kinds: Vec<NoteKind> = buffer.as_slice().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![NoteKind::NoteOn, NoteKind::NoteOff]);
        assert_eq!(buffer.note_ons().count(), 1);
    }

    #[test]
    fn test_full_buffer_drops_instead_of_growing() {
        let mut buffer = EventBuffer::with_capacity(3);
        buffer.trigger(EventSource::Onset(0), 36, 110);
        buffer.trigger(EventSource::Onset(1), 46, 110);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_event_serializes_with_tagged_source() {
        let event = NoteEvent {
            source: EventSource::Release(1),
            note: 53,
            velocity: 110,
            kind: NoteKind::NoteOn,
        };
        let text = toml::to_string(&event).unwrap();
        assert!(text.contains("kind = \"note_on\""));
        assert!(text.contains("type = \"release\""));
    }
}
