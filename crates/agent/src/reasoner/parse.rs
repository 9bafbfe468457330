//! Splitting a model response into its thought and action.
//!
//! A usable response has exactly one `<thought>…</thought>` block and exactly
//! one `<action>…</action>` block. Text outside the blocks is ignored. The
//! action may additionally be wrapped in a Markdown code fence.

use thiserror::Error;

/// A response that passed parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub thought: String,
    pub code: String,
}

/// Why a response could not be used. The message is fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("the response has no <{0}> block")]
    Missing(&'static str),

    #[error("the response has more than one <{0}> block")]
    Duplicated(&'static str),

    #[error("the <{0}> block is never closed with </{0}>")]
    Unclosed(&'static str),

    #[error("the <{0}> block is empty")]
    Empty(&'static str),
}

const THOUGHT: &str = "thought";
const ACTION: &str = "action";

/// Parse a raw model response.
pub fn parse_response(text: &str) -> Result<ParsedAction, ParseError> {
    let thought = extract_block(text, THOUGHT)?;
    let code = strip_code_fence(extract_block(text, ACTION)?);

    if thought.is_empty() {
        return Err(ParseError::Empty(THOUGHT));
    }
    if code.trim().is_empty() {
        return Err(ParseError::Empty(ACTION));
    }

    Ok(ParsedAction {
        thought: thought.to_string(),
        code: dedent(code),
    })
}

/// The trimmed body of the single `<tag>` block in `text`.
fn extract_block<'a>(text: &'a str, tag: &'static str) -> Result<&'a str, ParseError> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let opens = text.matches(&open).count();
    let closes = text.matches(&close).count();
    match (opens, closes) {
        (0, _) => return Err(ParseError::Missing(tag)),
        (1, 0) => return Err(ParseError::Unclosed(tag)),
        (1, 1) => {}
        _ => return Err(ParseError::Duplicated(tag)),
    }

    let start = text.find(&open).map(|i| i + open.len()).ok_or(ParseError::Missing(tag))?;
    let end = text[start..]
        .find(&close)
        .map(|i| start + i)
        .ok_or(ParseError::Unclosed(tag))?;
    Ok(text[start..end].trim())
}

/// Drop a surrounding ```` ```lang ```` fence, if any.
fn strip_code_fence(code: &str) -> &str {
    let trimmed = code.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return code;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return code;
    };
    // The first line holds the language tag, possibly empty
    match body.find('\n') {
        Some(newline) => &body[newline + 1..],
        None => body,
    }
}

/// Remove the indentation shared by every non-blank line.
fn dedent(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let out: Vec<&str> = lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                l.get(indent..).unwrap_or_else(|| l.trim_start())
            }
        })
        .collect();
    out.join("\n").trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_blocks() {
        let parsed = parse_response(
            "<thought>Use the calculator tool.</thought>\n<action>\nresult = calculator.calculate('2+2')\ncomplete(result)\n</action>",
        )
        .unwrap();
        assert_eq!(parsed.thought, "Use the calculator tool.");
        assert_eq!(
            parsed.code,
            "result = calculator.calculate('2+2')\ncomplete(result)"
        );
    }

    #[test]
    fn fenced_and_indented_action() {
        let text = "Sure!\n<thought>\n  Loop over items.\n</thought>\n<action>\n```python\n    for i in range(3):\n        print(i)\n```\n</action>\nDone.";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.thought, "Loop over items.");
        assert_eq!(parsed.code, "for i in range(3):\n    print(i)");
    }

    #[test]
    fn missing_sections() {
        assert_eq!(
            parse_response("<action>x = 1</action>"),
            Err(ParseError::Missing("thought"))
        );
        assert_eq!(
            parse_response("<thought>hmm</thought> x = 1"),
            Err(ParseError::Missing("action"))
        );
        assert_eq!(
            parse_response("<thought>hmm</thought><action>x = 1"),
            Err(ParseError::Unclosed("action"))
        );
    }

    #[test]
    fn duplicated_sections() {
        let text = "<thought>a</thought><action>x = 1</action><thought>b</thought><action>y = 2</action>";
        assert_eq!(parse_response(text), Err(ParseError::Duplicated("thought")));
    }

    #[test]
    fn empty_sections() {
        assert_eq!(
            parse_response("<thought> </thought><action>x = 1</action>"),
            Err(ParseError::Empty("thought"))
        );
        assert_eq!(
            parse_response("<thought>ok</thought><action>```python\n```</action>"),
            Err(ParseError::Empty("action"))
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "<thought>t</thought><action>print(1)</action>";
        assert_eq!(parse_response(text), parse_response(text));
    }
}
