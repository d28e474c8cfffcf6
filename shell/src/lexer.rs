//! A module implementing lexical analysis (tokenization) for the shell's command lines.

use thiserror::Error;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quotes and escapes already removed.
    Word(String),
    /// The pipe operator, `|`.
    PipeOp,
    /// The background operator, `&`.
    Background,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexingError {
    /// A closing quote (single or double) was not found.
    #[error("unterminated quote")]
    UnfinishedQuote,
    /// The line ended right after a backslash.
    #[error("dangling escape at end of line")]
    DanglingEscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    /// Creates a new instance of the lexical analysis Finite State Machine.
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Performs lexical analysis on the input string and returns a vector of tokens.
    ///
    /// Quotes group characters into one word without any expansion; `|` and `&` are
    /// operators wherever they appear outside quotes.
    fn make_tokens(&mut self) -> Result<Vec<Token>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start | LexingState::ReadingWord => self.handle_unquoted(ch, &mut out)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch)?,
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                return Err(LexingError::UnfinishedQuote);
            }
            LexingState::ReadingWord => self.finish_word(&mut out),
            LexingState::Start => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn handle_unquoted(&mut self, ch: char, out: &mut Vec<Token>) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' | '\n' | '\r' => self.finish_word(out),
            '|' | '&' => {
                self.finish_word(out);
                out.push(if ch == '|' { Token::PipeOp } else { Token::Background });
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                let escaped = self.read_char().ok_or(LexingError::DanglingEscape)?;
                self.buffer.push(escaped);
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
        Ok(())
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' => {
                let escaped = self.read_char().ok_or(LexingError::UnfinishedQuote)?;
                if !matches!(escaped, '"' | '\\') {
                    self.buffer.push('\\');
                }
                self.buffer.push(escaped);
            }
            c => self.buffer.push(c),
        }
        Ok(())
    }

    /// Emit the word collected so far, if any. `''` still yields an empty word.
    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if self.state == LexingState::ReadingWord {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
        }
        self.state = LexingState::Start;
    }
}

/// The main entry point function to perform lexical analysis.
///
/// Creates and runs the finite state machine to tokenize the input line.
pub fn split_into_tokens(line: &str) -> Result<Vec<Token>, LexingError> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}
