use crate::command::CommandLine;
use crate::lexer::Token;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsingError {
    #[error("syntax error near `|`: missing command")]
    EmptyStage,
    #[error("syntax error: `&` must end the command line")]
    MisplacedBackground,
    #[error("syntax error: `&` without a command")]
    BackgroundWithoutCommand,
    #[error("too many arguments ({0}, limit is {1})")]
    TooManyArgs(usize, usize),
}

struct PipelineBuilder {
    tokens: std::iter::Peekable<std::vec::IntoIter<Token>>,
    max_args: usize,
}

impl PipelineBuilder {
    fn new(tokens: Vec<Token>, max_args: usize) -> Self {
        PipelineBuilder {
            tokens: tokens.into_iter().peekable(),
            max_args,
        }
    }

    fn build(mut self) -> Result<Option<CommandLine>, ParsingError> {
        if self.tokens.peek().is_none() {
            return Ok(None);
        }

        let mut stages = vec![self.parse_stage()?];
        let mut background = false;
        while let Some(token) = self.tokens.next() {
            match token {
                Token::PipeOp => stages.push(self.parse_stage()?),
                Token::Background if self.tokens.peek().is_none() => background = true,
                Token::Background => return Err(ParsingError::MisplacedBackground),
                Token::Word(_) => unreachable!("parse_stage consumes every word"),
            }
        }

        Ok(Some(CommandLine { stages, background }))
    }

    /// Collect words up to the next operator; a stage must have at least one.
    fn parse_stage(&mut self) -> Result<Vec<String>, ParsingError> {
        let mut argv = Vec::new();
        while let Some(Token::Word(_)) = self.tokens.peek() {
            if let Some(Token::Word(word)) = self.tokens.next() {
                argv.push(word);
            }
        }
        if argv.len() > self.max_args {
            return Err(ParsingError::TooManyArgs(argv.len(), self.max_args));
        }
        if argv.is_empty() {
            return Err(match self.tokens.peek() {
                Some(Token::Background) => ParsingError::BackgroundWithoutCommand,
                _ => ParsingError::EmptyStage,
            });
        }
        Ok(argv)
    }
}

/// Build a [`CommandLine`] from tokens.
///
/// Returns `Ok(None)` for an empty line. `max_args` bounds the words of each stage,
/// the program name included.
pub fn construct_command_line(
    tokens: Vec<Token>,
    max_args: usize,
) -> Result<Option<CommandLine>, ParsingError> {
    PipelineBuilder::new(tokens, max_args).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::split_into_tokens;

    fn parse(line: &str) -> Result<Option<CommandLine>, ParsingError> {
        construct_command_line(split_into_tokens(line).unwrap(), 256)
    }

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn simple_foreground_command() {
        let line = parse("sleep 5").unwrap().unwrap();
        assert_eq!(line.stages, vec![argv(&["sleep", "5"])]);
        assert!(!line.background);
    }

    #[test]
    fn trailing_ampersand_means_background() {
        let line = parse("sleep 5 &").unwrap().unwrap();
        assert_eq!(line.stages, vec![argv(&["sleep", "5"])]);
        assert!(line.background);
    }

    #[test]
    fn pipeline_stages() {
        let line = parse("cat notes.txt | sort | uniq &").unwrap().unwrap();
        assert_eq!(
            line.stages,
            vec![argv(&["cat", "notes.txt"]), argv(&["sort"]), argv(&["uniq"])]
        );
        assert!(line.background);
    }

    #[test]
    fn empty_line_is_none() {
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn empty_stages_are_rejected() {
        assert_eq!(parse("| wc"), Err(ParsingError::EmptyStage));
        assert_eq!(parse("ls |"), Err(ParsingError::EmptyStage));
        assert_eq!(parse("ls | | wc"), Err(ParsingError::EmptyStage));
        assert_eq!(parse("ls | &"), Err(ParsingError::BackgroundWithoutCommand));
    }

    #[test]
    fn ampersand_must_be_last() {
        assert_eq!(parse("sleep 1 & sleep 2"), Err(ParsingError::MisplacedBackground));
        assert_eq!(parse("sleep 1 & &"), Err(ParsingError::MisplacedBackground));
        assert_eq!(parse("&"), Err(ParsingError::BackgroundWithoutCommand));
    }

    #[test]
    fn argument_limit() {
        let tokens = split_into_tokens("a b c d").unwrap();
        assert_eq!(
            construct_command_line(tokens, 3),
            Err(ParsingError::TooManyArgs(4, 3))
        );
        let tokens = split_into_tokens("a b c").unwrap();
        assert!(construct_command_line(tokens, 3).is_ok());
    }
}
