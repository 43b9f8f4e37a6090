//! Stream parser turning serial text into [`Message`]s.
//!
//! The parser owns two pieces of state that survive between reads:
//!
//! - the trailing partial line of the previous read (no `\n` seen yet), and
//! - an in-progress chunked message together with whether the previous line
//!   was empty.
//!
//! ```text
//! [R@APM] 0 listing+        <- message ends with '+', chunk opens
//! file1.mp3 1024            <- appended to body
//! file2.mp3 2048            <- appended to body
//!                           <- first empty line
//!                           <- second empty line, message complete
//! ```

use log::{trace, warn};

use crate::protocol::message::Message;

/// Incremental line/message parser.
#[derive(Debug, Default)]
pub struct MessageParser {
    partial: String,
    chunk: Option<Message>,
    last_line_empty: bool,
}

impl MessageParser {
    /// Create a parser with no carried-over state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and collect the messages it completes.
    ///
    /// `on_line` is invoked once for every complete non-empty raw line, in
    /// arrival order, before that line is interpreted. Malformed prefixed
    /// lines are logged and dropped.
    pub fn feed<F>(&mut self, data: &str, mut on_line: F) -> Vec<Message>
    where
        F: FnMut(&str),
    {
        let mut messages = Vec::new();

        self.partial
            .push_str(data);
        let Some(last_newline) = self
            .partial
            .rfind('\n')
        else {
            return messages;
        };

        let tail = self.partial[last_newline + 1..].to_string();
        let complete = std::mem::replace(&mut self.partial, tail);

        for raw in complete[..last_newline].split('\n') {
            let line = raw
                .strip_suffix('\r')
                .unwrap_or(raw);

            if !line.is_empty() {
                trace!("<< {line}");
                on_line(line);
            }

            if let Some(message) = self.process_line(line) {
                messages.push(message);
            }
        }

        messages
    }

    /// Whether a chunked message is currently being accumulated.
    pub fn in_chunk(&self) -> bool {
        self.chunk
            .is_some()
    }

    /// Drop all carried-over state.
    pub fn reset(&mut self) {
        self.partial
            .clear();
        self.chunk = None;
        self.last_line_empty = false;
    }

    fn process_line(&mut self, line: &str) -> Option<Message> {
        let Some(chunk) = self
            .chunk
            .as_mut()
        else {
            self.last_line_empty = false;
            return self.start_message(line);
        };

        if line.is_empty() {
            if self.last_line_empty {
                self.last_line_empty = false;
                return self
                    .chunk
                    .take();
            }
            self.last_line_empty = true;
        } else {
            self.last_line_empty = false;
            chunk.append_body_line(line);
        }
        None
    }

    fn start_message(&mut self, line: &str) -> Option<Message> {
        if line
            .trim()
            .is_empty()
        {
            return None;
        }

        match Message::parse_line(line) {
            Ok(message) if message.opens_chunk() => {
                self.chunk = Some(message);
                None
            },
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping malformed line {line:?}: {e}");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{MessageKind, ResultCode};

    const LISTING: &str = "[R@APM] 0 listing+\nfile1.mp3 1024\nfile2.mp3 2048\n\n\n";

    fn feed_all(parser: &mut MessageParser, parts: &[&str]) -> (Vec<Message>, Vec<String>) {
        let mut lines = Vec::new();
        let mut messages = Vec::new();
        for part in parts {
            messages.extend(parser.feed(part, |l| lines.push(l.to_string())));
        }
        (messages, lines)
    }

    #[test]
    fn test_single_response_line() {
        let mut parser = MessageParser::new();
        let (messages, lines) = feed_all(&mut parser, &["[R@APM] 0 ok\n"]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), MessageKind::Response);
        assert_eq!(messages[0].code(), Some(ResultCode::Success));
        assert_eq!(messages[0].message(), "ok");
        assert!(messages[0].body().is_none());
        assert_eq!(lines, vec!["[R@APM] 0 ok"]);
    }

    #[test]
    fn test_partial_line_is_held_back() {
        let mut parser = MessageParser::new();
        let (messages, lines) = feed_all(&mut parser, &["[N@APM] 53 disc"]);
        assert!(messages.is_empty());
        assert!(lines.is_empty());

        let (messages, lines) = feed_all(&mut parser, &["onnected\r\n"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), MessageKind::Notify);
        assert_eq!(messages[0].code(), Some(ResultCode::WifiDisconnected));
        assert_eq!(messages[0].message(), "disconnected");
        assert_eq!(lines, vec!["[N@APM] 53 disconnected"]);
    }

    #[test]
    fn test_chunked_listing() {
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(&mut parser, &[LISTING]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), MessageKind::Response);
        assert_eq!(messages[0].message(), "listing+");
        assert_eq!(messages[0].body(), Some("file1.mp3 1024\nfile2.mp3 2048"));
        assert!(!parser.in_chunk());
    }

    #[test]
    fn test_chunked_notify_carries_body() {
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(&mut parser, &["[N@APM] 50 scan+\nhome -40\n", "cafe -71\n\n\n"]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), MessageKind::Notify);
        assert_eq!(messages[0].code(), Some(ResultCode::WifiConnected));
        assert_eq!(messages[0].message(), "scan+");
        assert_eq!(messages[0].body(), Some("home -40\ncafe -71"));
        assert!(!parser.in_chunk());
    }

    #[test]
    fn test_chunk_survives_single_empty_line() {
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(&mut parser, &["[R@APM] 0 list+\na 1\n\nb 2\n"]);
        assert!(messages.is_empty());
        assert!(parser.in_chunk());

        let (messages, _) = feed_all(&mut parser, &["\n\n"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body(), Some("a 1\nb 2"));
    }

    #[test]
    fn test_empty_chunk_has_no_body() {
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(&mut parser, &["[R@APM] 0 empty+\n\n\n"]);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].body().is_none());
    }

    #[test]
    fn test_line_callback_fires_for_chunk_body_lines() {
        let mut parser = MessageParser::new();
        let (_, lines) = feed_all(&mut parser, &["[R@APM] 0 listing+\nfile1.mp3 1024\n"]);
        assert_eq!(lines, vec!["[R@APM] 0 listing+", "file1.mp3 1024"]);
    }

    #[test]
    fn test_empty_lines_outside_chunk_are_ignored() {
        let mut parser = MessageParser::new();
        let (messages, lines) = feed_all(&mut parser, &["\n\r\n   \n[R@APM] 0 ok\n\n"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(lines, vec!["   ", "[R@APM] 0 ok"]);
    }

    #[test]
    fn test_malformed_line_is_dropped_and_stream_continues() {
        let mut parser = MessageParser::new();
        let (messages, lines) = feed_all(&mut parser, &["[R@APM] oops\n[R@APM] 0 ok\n"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message(), "ok");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_unknown_lines_are_emitted_verbatim() {
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(&mut parser, &["Yonabe Factory / SlappyBell / 1.0\n"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), MessageKind::Unknown);
        assert_eq!(messages[0].code(), None);
    }

    #[test]
    fn test_interleaved_notify_and_chunk() {
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(
            &mut parser,
            &["[N@APM] 50 connected\n[R@APM] 0 files+\nx 1\n\n\n[R@APM] 0 ok\n"],
        );
        let kinds: Vec<_> = messages
            .iter()
            .map(Message::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Notify,
                MessageKind::Response,
                MessageKind::Response
            ]
        );
        assert_eq!(messages[1].body(), Some("x 1"));
    }

    #[test]
    fn test_split_invariance_at_every_position() {
        let stream = format!("[N@APM] 50 connected\r\n{LISTING}junk\n[R@APM] 0 ok\n");

        let mut whole = MessageParser::new();
        let (expected, expected_lines) = feed_all(&mut whole, &[&stream]);
        assert_eq!(expected.len(), 4);

        for split in 0..=stream.len() {
            let (a, b) = stream.split_at(split);
            let mut parser = MessageParser::new();
            let (messages, lines) = feed_all(&mut parser, &[a, b]);
            assert_eq!(messages, expected, "split at {split}");
            assert_eq!(lines, expected_lines, "split at {split}");
        }
    }

    #[test]
    fn test_split_invariance_one_byte_at_a_time() {
        let stream = format!("{LISTING}[N@APM] 52 auth fail\n");
        let mut whole = MessageParser::new();
        let (expected, _) = feed_all(&mut whole, &[&stream]);

        let pieces: Vec<String> = stream
            .chars()
            .map(String::from)
            .collect();
        let parts: Vec<&str> = pieces
            .iter()
            .map(String::as_str)
            .collect();
        let mut parser = MessageParser::new();
        let (messages, _) = feed_all(&mut parser, &parts);
        assert_eq!(messages, expected);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut parser = MessageParser::new();
        let _ = parser.feed("[R@APM] 0 list+\na\n[R@APM] 0 par", |_| {});
        assert!(parser.in_chunk());
        parser.reset();
        assert!(!parser.in_chunk());

        let messages = parser.feed("[R@APM] 0 ok\n", |_| {});
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message(), "ok");
    }
}
