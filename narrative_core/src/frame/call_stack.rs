//! Subroutine call stack.

use serde::{Deserialize, Serialize};

use story_graph::{ReturnSink, Uid};

use crate::error::CallStackUnderflow;

/// A pending return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub call_type: Option<String>,
    /// Node the call was made from.
    pub caller: Uid,
    /// Where the cursor goes when the call returns.
    pub return_to: Uid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<CallFrame, CallStackUnderflow> {
        self.frames.pop().ok_or(CallStackUnderflow)
    }

    pub fn peek(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Pop the top frame if `sink` accepts it.
    ///
    /// A sink without a call type accepts any frame; a typed sink only
    /// accepts a frame pushed with the same type and leaves the stack
    /// untouched otherwise.
    pub fn pop_for(&mut self, sink: &ReturnSink) -> Result<Option<CallFrame>, CallStackUnderflow> {
        let top = self.frames.last().ok_or(CallStackUnderflow)?;
        match &sink.call_type {
            Some(wanted) if top.call_type.as_ref() != Some(wanted) => Ok(None),
            _ => self.pop().map(Some),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(call_type: Option<&str>) -> CallFrame {
        CallFrame {
            call_type: call_type.map(str::to_string),
            caller: Uid::new(),
            return_to: Uid::new(),
        }
    }

    #[test]
    fn test_push_pop() {
        let mut stack = CallStack::new();
        let first = frame(None);
        let second = frame(Some("dialog"));
        stack.push(first.clone());
        stack.push(second.clone());

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.peek(), Some(&second));
        assert_eq!(stack.pop(), Ok(second));
        assert_eq!(stack.pop(), Ok(first));
        assert_eq!(stack.pop(), Err(CallStackUnderflow));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_typed_sink() {
        let mut stack = CallStack::new();
        stack.push(frame(Some("dialog")));

        let combat = ReturnSink {
            call_type: Some("combat".into()),
        };
        assert_eq!(stack.pop_for(&combat), Ok(None));
        assert_eq!(stack.len(), 1);

        let dialog = ReturnSink {
            call_type: Some("dialog".into()),
        };
        assert!(stack.pop_for(&dialog).unwrap().is_some());
        assert_eq!(stack.pop_for(&ReturnSink::default()), Err(CallStackUnderflow));
    }
}
