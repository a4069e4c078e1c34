use std::collections::BTreeSet;
use std::mem;

use super::CanonicalFrame;

/// Whether the scanner is inside a frame header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ScanState {
    #[default]
    Outside,
    InHeader,
}

/// How far into the source location of a header the scanner got.
///
/// A header looks like `#N 0xADDR in function (args) at file.c:LINE`. Each step is only
/// reachable from the previous one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
enum Progress {
    #[default]
    Signature,
    /// A `)` was seen.
    ArgumentsClosed,
    /// The `at` marker was seen.
    AfterAt,
    /// A `:` followed by a line number was seen.
    HasFilename,
}

#[derive(Clone, Copy, Debug, Default)]
struct Lexical {
    quoted: bool,
    bracketed: bool,
    /// Inside a run of digits, which is elided up to the next delimiter.
    digits: bool,
}

/// One input byte, classified with one byte of look-ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Digit(u8),
    /// `\"`
    EscapedQuote,
    Quote,
    Open,
    Close,
    Newline,
    Comma,
    Space(u8),
    /// The `a` of `at`.
    AtMarker,
    /// A `:` directly followed by a digit.
    FilenameMarker,
    Other(u8),
}

impl Token {
    fn classify(input: &[u8]) -> Self {
        let next = input.get(1).copied();
        match input[0] {
            b @ b'0'..=b'9' => Token::Digit(b),
            b'\\' if next == Some(b'"') => Token::EscapedQuote,
            b'"' => Token::Quote,
            b'(' => Token::Open,
            b')' => Token::Close,
            b'\n' => Token::Newline,
            b',' => Token::Comma,
            b if is_c_space(b) => Token::Space(b),
            b'a' if next == Some(b't') => Token::AtMarker,
            b':' if next.is_some_and(|b| b.is_ascii_digit()) => Token::FilenameMarker,
            b => Token::Other(b),
        }
    }

    fn byte(self) -> u8 {
        match self {
            Token::Digit(b) | Token::Space(b) | Token::Other(b) => b,
            Token::EscapedQuote => b'\\',
            Token::Quote => b'"',
            Token::Open => b'(',
            Token::Close => b')',
            Token::Newline => b'\n',
            Token::Comma => b',',
            Token::AtMarker => b'a',
            Token::FilenameMarker => b':',
        }
    }
}

/// `isspace` in the C locale, which unlike [`u8::is_ascii_whitespace`] includes `\v`.
fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

/// `#0 ` through `#7 `. Deeper frames never start a header.
fn starts_frame(input: &[u8]) -> bool {
    matches!(input, [b'#', b'0'..=b'7', b' ', ..])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Skip,
    Emit(u8),
    /// Skip this byte and the next one.
    SkipPair,
    Commit,
}

#[derive(Debug, Default)]
struct Header {
    text: Vec<u8>,
    /// Offset in `text` where the line number starts.
    line_at: Option<usize>,
    progress: Progress,
    lexical: Lexical,
}

impl Header {
    fn transition(&mut self, token: Token) -> Action {
        let quoted = self.lexical.quoted;
        match token {
            Token::Digit(_) if !quoted && self.progress < Progress::AfterAt => {
                self.lexical.digits = true;
                Action::Skip
            }
            Token::EscapedQuote => Action::SkipPair,
            Token::Quote => {
                self.lexical.quoted = !quoted;
                Action::Skip
            }
            Token::Open if !quoted => {
                self.lexical.bracketed = true;
                self.lexical.digits = false;
                Action::Emit(b'(')
            }
            Token::Close if !quoted => {
                self.lexical.bracketed = false;
                self.lexical.digits = false;
                self.progress = self.progress.max(Progress::ArgumentsClosed);
                Action::Emit(b')')
            }
            Token::Newline if self.progress == Progress::HasFilename => Action::Commit,
            Token::Comma | Token::Space(_) | Token::Newline if !quoted => {
                self.lexical.digits = false;
                Action::Skip
            }
            Token::AtMarker if !quoted && self.progress >= Progress::ArgumentsClosed => {
                self.progress = self.progress.max(Progress::AfterAt);
                Action::Emit(b'a')
            }
            Token::FilenameMarker if !quoted && self.progress >= Progress::AfterAt => {
                self.progress = Progress::HasFilename;
                if self.line_at.is_none() {
                    self.line_at = Some(self.text.len());
                }
                Action::Skip
            }
            token => {
                let Lexical {
                    quoted,
                    bracketed,
                    digits,
                } = self.lexical;
                if quoted || bracketed || digits {
                    Action::Skip
                } else {
                    Action::Emit(token.byte())
                }
            }
        }
    }

    fn into_frame(self) -> CanonicalFrame {
        let split = self.line_at.unwrap_or(self.text.len());
        let (signature, line) = self.text.split_at(split);
        CanonicalFrame::new(&String::from_utf8_lossy(signature), &String::from_utf8_lossy(line))
    }
}

/// Extracts canonical frames from raw debugger output.
#[derive(Debug, Default)]
pub(super) struct Scanner {
    state: ScanState,
    header: Header,
    frames: BTreeSet<CanonicalFrame>,
}

impl Scanner {
    pub(super) fn scan(mut self, input: &[u8]) -> BTreeSet<CanonicalFrame> {
        let mut pos = 0;
        while pos < input.len() {
            pos += self.feed(&input[pos..]);
        }
        // an unterminated header at the end of the input is dropped
        self.frames
    }

    /// Processes the first byte of `input`, returning how many bytes were consumed.
    fn feed(&mut self, input: &[u8]) -> usize {
        if starts_frame(input) && !self.header.lexical.quoted {
            self.begin_frame();
        }
        if self.state == ScanState::Outside {
            return 1;
        }

        match self.header.transition(Token::classify(input)) {
            Action::Skip => 1,
            Action::Emit(b) => {
                self.header.text.push(b);
                1
            }
            Action::SkipPair => 2,
            Action::Commit => {
                let header = mem::take(&mut self.header);
                self.frames.insert(header.into_frame());
                self.state = ScanState::Outside;
                1
            }
        }
    }

    /// A header without a filename is abandoned when the next frame starts, but its lexical
    /// state and progress carry over.
    fn begin_frame(&mut self) {
        if self.state == ScanState::InHeader && self.header.progress != Progress::HasFilename {
            self.header.text.clear();
        }
        self.state = ScanState::InHeader;
    }
}
