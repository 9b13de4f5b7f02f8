use anyhow::{Result, bail};
use serde_json::{Map, Number, Value};

/// Parses a JSON document or a Python literal (`{'a': [1, 'x'], 'b': None}`)
/// into a JSON value.
pub fn parse_literal(input: &str) -> Result<Value> {
    let mut parser = LiteralParser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.pos < parser.chars.len() {
        bail!("unexpected trailing input at position {}", parser.pos);
    }
    Ok(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let value = self.peek();
        if value.is_some() {
            self.pos += 1;
        }
        value
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_whitespace();
        match self.bump() {
            Some(found) if found == expected => Ok(()),
            Some(found) => bail!(
                "expected '{expected}' at position {}, found '{found}'",
                self.pos - 1
            ),
            None => bail!("expected '{expected}' but input ended"),
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_sequence('[', ']'),
            Some('(') => self.parse_sequence('(', ')'),
            Some('\'') | Some('"') => Ok(Value::String(self.parse_string()?)),
            Some(character) if character == '-' || character == '+' || character.is_ascii_digit() => {
                self.parse_number()
            }
            Some(character) if character.is_alphabetic() => self.parse_keyword(),
            Some(character) => bail!("unexpected '{character}' at position {}", self.pos),
            None => bail!("unexpected end of input"),
        }
    }

    fn parse_object(&mut self) -> Result<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }

            let key = match self.parse_value()? {
                Value::String(value) => value,
                Value::Number(value) => value.to_string(),
                other => bail!("unsupported object key: {other}"),
            };
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                Some(found) => bail!("expected ',' or '}}' in object, found '{found}'"),
                None => bail!("unterminated object"),
            }
        }
    }

    fn parse_sequence(&mut self, open: char, close: char) -> Result<Value> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }

            items.push(self.parse_value()?);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(found) if found == close => return Ok(Value::Array(items)),
                Some(found) => bail!("expected ',' or '{close}' in sequence, found '{found}'"),
                None => bail!("unterminated sequence"),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        let Some(quote) = self.bump() else {
            bail!("expected string");
        };
        let mut out = String::new();
        loop {
            let Some(character) = self.bump() else {
                bail!("unterminated string literal");
            };
            if character == quote {
                return Ok(out);
            }
            if character != '\\' {
                out.push(character);
                continue;
            }

            let Some(escaped) = self.bump() else {
                bail!("dangling escape at end of input");
            };
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' | '/' => out.push(escaped),
                'u' => out.push(self.parse_unicode_escape(4)?),
                'U' => out.push(self.parse_unicode_escape(8)?),
                'x' => out.push(self.parse_unicode_escape(2)?),
                '\n' => {}
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn parse_unicode_escape(&mut self, width: usize) -> Result<char> {
        let mut digits = String::with_capacity(width);
        for _ in 0..width {
            match self.bump() {
                Some(character) if character.is_ascii_hexdigit() => digits.push(character),
                _ => bail!("invalid \\u escape near position {}", self.pos),
            }
        }
        let code = u32::from_str_radix(&digits, 16)?;

        if (0xD800..0xDC00).contains(&code) && self.peek() == Some('\\') {
            let saved = self.pos;
            self.pos += 1;
            if self.bump() == Some('u') {
                let low = self.parse_unicode_escape_raw()?;
                if (0xDC00..0xE000).contains(&low) {
                    let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                    if let Some(character) = char::from_u32(combined) {
                        return Ok(character);
                    }
                }
            }
            self.pos = saved;
        }

        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn parse_unicode_escape_raw(&mut self) -> Result<u32> {
        let mut digits = String::with_capacity(4);
        for _ in 0..4 {
            match self.bump() {
                Some(character) if character.is_ascii_hexdigit() => digits.push(character),
                _ => bail!("invalid surrogate escape near position {}", self.pos),
            }
        }
        Ok(u32::from_str_radix(&digits, 16)?)
    }

    fn parse_number(&mut self) -> Result<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|character| character.is_ascii_digit() || matches!(character, '.' | 'e' | 'E' | '_' | '-' | '+'))
        {
            self.pos += 1;
        }

        let raw = self.chars[start..self.pos]
            .iter()
            .filter(|character| **character != '_')
            .collect::<String>();
        let raw = raw.strip_prefix('+').unwrap_or(&raw);

        if let Ok(value) = raw.parse::<i64>() {
            return Ok(Value::Number(value.into()));
        }
        match raw.parse::<f64>().ok().and_then(Number::from_f64) {
            Some(value) => Ok(Value::Number(value)),
            None => bail!("invalid number literal '{raw}'"),
        }
    }

    fn parse_keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|character| character.is_alphanumeric() || character == '_')
        {
            self.pos += 1;
        }
        let word = self.chars[start..self.pos].iter().collect::<String>();
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            other => bail!("unsupported literal keyword '{other}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_python_dict_with_single_quotes() {
        let raw = "{'question': '다음 중 옳은 것은?', 'choices': ['가', '나', \"다'\"], 'answer': 2}";
        let value = parse_literal(raw).expect("literal should parse");
        assert_eq!(
            value,
            json!({"question": "다음 중 옳은 것은?", "choices": ["가", "나", "다'"], "answer": 2})
        );
    }

    #[test]
    fn parses_json_documents_too() {
        let raw = r#"{"question": "q", "choices": ["a\nb", "é"], "answer": "3", "x": null}"#;
        let value = parse_literal(raw).expect("json should parse");
        assert_eq!(value["choices"][0], "a\nb");
        assert_eq!(value["choices"][1], "é");
        assert_eq!(value["answer"], "3");
        assert!(value["x"].is_null());
    }

    #[test]
    fn parses_keywords_tuples_and_trailing_commas() {
        let raw = "[{'ok': True, 'no': False, 'none': None, 'pair': (1, -2.5),},]";
        let value = parse_literal(raw).expect("literal should parse");
        assert_eq!(
            value,
            json!([{"ok": true, "no": false, "none": null, "pair": [1, -2.5]}])
        );
    }

    #[test]
    fn escaped_quotes_stay_inside_string() {
        let value = parse_literal(r"'it\'s'").expect("escaped quote");
        assert_eq!(value, json!("it's"));
    }

    #[test]
    fn rejects_unterminated_and_trailing_input() {
        assert!(parse_literal("{'a': 1").is_err());
        assert!(parse_literal("'open").is_err());
        assert!(parse_literal("[1, 2] extra").is_err());
        assert!(parse_literal("{'a': undefined}").is_err());
    }
}
