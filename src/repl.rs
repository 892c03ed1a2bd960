use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    StyledText, ValidationResult, Validator,
};
use std::borrow::Cow;

use crate::tokenizer::{tokenize, Token, TokenType};

#[derive(Clone)]
pub struct REPLPrompt;

impl Prompt for REPLPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("prog")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<str> {
        Cow::Borrowed(" ❯ ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("  ... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

/// Keeps the buffer open while a block header is still waiting for its `end`.
pub struct REPLValidator;

impl Validator for REPLValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        if open_blocks(line) > 0 {
            ValidationResult::Incomplete
        } else {
            ValidationResult::Complete
        }
    }
}

/// Number of `if`/`while`/`func` headers in `source` not yet closed by `end`.
///
/// Input that does not tokenize counts as complete so the error gets reported.
pub fn open_blocks(source: &str) -> usize {
    let Ok(tokens) = tokenize(source) else {
        return 0;
    };

    let mut depth: usize = 0;
    for token in &tokens {
        match token.token_type {
            TokenType::If | TokenType::While | TokenType::Func => depth += 1,
            TokenType::End => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

pub static KEYWORD_COLOR: Color = Color::LightBlue;
pub static LITERAL_COLOR: Color = Color::Yellow;
pub static DEFAULT_COLOR: Color = Color::White;
pub static OPERATOR_COLOR: Color = Color::DarkGray;
pub static COMMENT_COLOR: Color = Color::Green;

fn token_color(token: &Token) -> Color {
    match &token.token_type {
        t if t.is_keyword() => KEYWORD_COLOR,
        t if t.is_literal() => LITERAL_COLOR,
        TokenType::Identifier(_) | TokenType::NewLine | TokenType::EOF => DEFAULT_COLOR,
        _ => OPERATOR_COLOR,
    }
}

pub struct SyntaxHighlighter;

impl Highlighter for SyntaxHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();

        let tokens = match tokenize(line) {
            Ok(t) => t,
            Err(_) => {
                styled_text.push((Style::new().fg(DEFAULT_COLOR), line.to_string()));
                return styled_text;
            }
        };

        // Bytes between tokens are whitespace or comments.
        let mut cursor = 0;
        for token in &tokens {
            let span = token.byte_span.clone();
            if span.start > cursor {
                let gap = &line[cursor..span.start];
                let color = if gap.trim_start().starts_with('#') {
                    COMMENT_COLOR
                } else {
                    DEFAULT_COLOR
                };
                styled_text.push((Style::new().fg(color), gap.to_string()));
            }
            if span.end > span.start {
                styled_text.push((
                    Style::new().fg(token_color(token)),
                    line[span.clone()].to_string(),
                ));
            }
            cursor = cursor.max(span.end);
        }

        if cursor < line.len() {
            styled_text.push((Style::new().fg(DEFAULT_COLOR), line[cursor..].to_string()));
        }

        styled_text
    }
}
