#![forbid(unsafe_code)]

use cdr_core::{DocId, MAX_VERSION_DATE};

/// Per-invocation state for one filter or filter-chain run. Created fresh at
/// the start of the chain, dropped at the end, never shared across threads.
#[derive(Debug)]
pub struct RunContext {
    /// The document currently being filtered, for `cdrutil:/docid` and
    /// `cdr:/*` references.
    pub doc_id: Option<DocId>,
    /// Ceiling for document version resolution.
    pub max_doc_date: String,
    /// Ceiling for filter version resolution; defaults to the document
    /// ceiling when not supplied separately.
    pub max_filter_date: String,
    messages: Vec<String>,
    fatal: Option<String>,
    slots: Vec<Option<UriSlot>>,
}

#[derive(Debug)]
struct UriSlot {
    data: Vec<u8>,
    pos: usize,
}

impl RunContext {
    pub fn new(
        doc_id: Option<DocId>,
        max_doc_date: Option<String>,
        max_filter_date: Option<String>,
    ) -> Self {
        let max_doc_date = max_doc_date.unwrap_or_else(|| MAX_VERSION_DATE.to_string());
        let max_filter_date = max_filter_date.unwrap_or_else(|| max_doc_date.clone());
        Self {
            doc_id,
            max_doc_date,
            max_filter_date,
            messages: Vec::new(),
            fatal: None,
            slots: Vec::new(),
        }
    }

    pub fn add_message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }

    /// Records a fatal condition for the caller to inspect after the engine
    /// returns. The first fatal message wins; later ones are usually
    /// cascade noise.
    pub fn set_fatal(&mut self, text: impl Into<String>) {
        if self.fatal.is_none() {
            self.fatal = Some(text.into());
        }
    }

    pub fn take_fatal(&mut self) -> Option<String> {
        self.fatal.take()
    }

    /// Stores a resolved document and returns its handle. Freed slots are
    /// reused before the table grows.
    pub(crate) fn open_slot(&mut self, data: Vec<u8>) -> i32 {
        let slot = UriSlot { data, pos: 0 };
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(slot);
                return index as i32;
            }
        }
        self.slots.push(Some(slot));
        (self.slots.len() - 1) as i32
    }

    pub(crate) fn read_slot(&mut self, handle: i32, buf: &mut [u8]) -> Option<usize> {
        let slot = self
            .slots
            .get_mut(usize::try_from(handle).ok()?)?
            .as_mut()?;
        let remaining = &slot.data[slot.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        slot.pos += n;
        Some(n)
    }

    pub(crate) fn close_slot(&mut self, handle: i32) -> bool {
        match usize::try_from(handle)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
        {
            Some(entry @ Some(_)) => {
                *entry = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_date_defaults_to_doc_date() {
        let ctx = RunContext::new(None, Some("2020-05-01".to_string()), None);
        assert_eq!(ctx.max_doc_date, "2020-05-01");
        assert_eq!(ctx.max_filter_date, "2020-05-01");

        let ctx = RunContext::new(None, None, None);
        assert_eq!(ctx.max_doc_date, MAX_VERSION_DATE);
        assert_eq!(ctx.max_filter_date, MAX_VERSION_DATE);
    }

    #[test]
    fn slots_are_reused_after_close() {
        let mut ctx = RunContext::new(None, None, None);
        let a = ctx.open_slot(b"aaa".to_vec());
        let b = ctx.open_slot(b"bbb".to_vec());
        assert_eq!((a, b), (0, 1));

        assert!(ctx.close_slot(a));
        let c = ctx.open_slot(b"ccc".to_vec());
        assert_eq!(c, a);

        let mut buf = [0u8; 2];
        assert_eq!(ctx.read_slot(c, &mut buf), Some(2));
        assert_eq!(&buf, b"cc");
        assert_eq!(ctx.read_slot(c, &mut buf), Some(1));
        assert_eq!(ctx.read_slot(c, &mut buf), Some(0));
    }

    #[test]
    fn first_fatal_message_wins() {
        let mut ctx = RunContext::new(None, None, None);
        ctx.set_fatal("first");
        ctx.set_fatal("second");
        assert_eq!(ctx.take_fatal().as_deref(), Some("first"));
        assert_eq!(ctx.take_fatal(), None);
    }

    #[test]
    fn closing_unknown_handle_is_an_error() {
        let mut ctx = RunContext::new(None, None, None);
        assert!(!ctx.close_slot(7));
        assert!(!ctx.close_slot(-1));
    }
}
