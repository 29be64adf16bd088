/// Parser for the script language used by `!` command templates
///
/// **Supported Syntax:**
/// - Calls: `output("text")`, `prop($this, "closed")`, `cmd("say hi")`
/// - Operators: `&&`, `||`, `!`, `==`, `!=`, `<`, `>`, `<=`, `>=`, `+`, `-`
/// - Ternary: `cond ? then : else`
/// - Sequences: `set($this, "lit", true); output("Click.")`
/// - Variables: `$0..$N`, `$args`, `$this`, `$me`, `$actor`, `$here`, `$event`
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    String(String),
    Number(i64),
    Variable(String),

    And,
    Or,
    Not,
    Question,
    Colon,
    Semicolon,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Plus,
    Minus,

    LeftParen,
    RightParen,
    Comma,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{}'", s),
            Token::String(s) => write!(f, "string \"{}\"", s),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Variable(v) => write!(f, "variable ${}", v),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Equal => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::Greater => write!(f, ">"),
            Token::Less => write!(f, "<"),
            Token::GreaterEqual => write!(f, ">="),
            Token::LessEqual => write!(f, "<="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Call {
        name: String,
        args: Vec<AstNode>,
    },

    BinaryOp {
        op: BinaryOperator,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },

    Not(Box<AstNode>),

    Ternary {
        condition: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Box<AstNode>,
    },

    StringLiteral(String),
    NumberLiteral(i64),
    BooleanLiteral(bool),
    Variable(String),

    Sequence(Vec<AstNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    And,
    Or,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Add,
    Subtract,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Greater => ">",
            BinaryOperator::Less => "<",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
        };
        f.write_str(symbol)
    }
}

pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        self.position += 1;
        ch
    }

    /// Consume `next` if it follows; used for two-character operators.
    fn follows(&mut self, next: char) -> bool {
        if self.current() == Some(next) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), Some(ch) if ch.is_whitespace()) {
            self.advance();
        }
    }

    fn read_string(&mut self, quote: char) -> Result<String, String> {
        let mut result = String::new();
        while let Some(ch) = self.advance() {
            if ch == quote {
                return Ok(result);
            }
            if ch == '\\' {
                match self.advance() {
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    Some(other) => result.push(other),
                    None => break,
                }
            } else {
                result.push(ch);
            }
        }
        Err("Unterminated string literal".to_string())
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_number(&mut self) -> Result<i64, String> {
        let mut digits = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        digits
            .parse()
            .map_err(|_| format!("Number out of range: {}", digits))
    }

    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace();
        let Some(ch) = self.current() else {
            return Ok(Token::Eof);
        };
        if ch.is_ascii_digit() {
            return Ok(Token::Number(self.read_number()?));
        }
        if ch.is_alphabetic() || ch == '_' {
            return Ok(Token::Identifier(self.read_identifier()));
        }
        self.advance();
        let token = match ch {
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            ',' => Token::Comma,
            '?' => Token::Question,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '&' if self.follows('&') => Token::And,
            '&' => return Err("Expected '&&', found single '&'".to_string()),
            '|' if self.follows('|') => Token::Or,
            '|' => return Err("Expected '||', found single '|'".to_string()),
            '=' if self.follows('=') => Token::Equal,
            '=' => return Err("Expected '==', found single '='".to_string()),
            '!' if self.follows('=') => Token::NotEqual,
            '!' => Token::Not,
            '>' if self.follows('=') => Token::GreaterEqual,
            '>' => Token::Greater,
            '<' if self.follows('=') => Token::LessEqual,
            '<' => Token::Less,
            '"' | '\'' => Token::String(self.read_string(ch)?),
            '$' => {
                let name = self.read_identifier();
                if name.is_empty() {
                    return Err("Expected variable name after '$'".to_string());
                }
                Token::Variable(name)
            }
            other => return Err(format!("Unexpected character: '{}'", other)),
        };
        Ok(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: u8,
    max_depth: u8,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, max_depth: u8) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
            max_depth,
        }
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        if *self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(format!("Expected {}, found {}", expected, self.current()))
        }
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(format!("Expression nested deeper than {}", self.max_depth));
        }
        Ok(())
    }

    fn parse_primary(&mut self) -> Result<AstNode, String> {
        match self.current().clone() {
            Token::String(s) => {
                self.advance();
                Ok(AstNode::StringLiteral(s))
            }
            Token::Number(n) => {
                self.advance();
                Ok(AstNode::NumberLiteral(n))
            }
            Token::Variable(v) => {
                self.advance();
                Ok(AstNode::Variable(v))
            }
            Token::Identifier(name) => {
                self.advance();
                match name.as_str() {
                    "true" => return Ok(AstNode::BooleanLiteral(true)),
                    "false" => return Ok(AstNode::BooleanLiteral(false)),
                    _ => {}
                }
                let mut args = Vec::new();
                if *self.current() == Token::LeftParen {
                    self.advance();
                    if *self.current() != Token::RightParen {
                        loop {
                            args.push(self.parse_ternary()?);
                            if *self.current() == Token::Comma {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RightParen)?;
                }
                Ok(AstNode::Call { name, args })
            }
            Token::LeftParen => {
                self.advance();
                self.descend()?;
                let expr = self.parse_sequence()?;
                self.depth -= 1;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            token => Err(format!("Unexpected token in expression: {}", token)),
        }
    }

    fn parse_unary(&mut self) -> Result<AstNode, String> {
        match self.current() {
            Token::Not => {
                self.advance();
                Ok(AstNode::Not(Box::new(self.parse_unary()?)))
            }
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(AstNode::BinaryOp {
                    op: BinaryOperator::Subtract,
                    left: Box::new(AstNode::NumberLiteral(0)),
                    right: Box::new(operand),
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_additive(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::Greater => BinaryOperator::Greater,
                Token::Less => BinaryOperator::Less,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                Token::LessEqual => BinaryOperator::LessEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_comparison()?;
        while *self.current() == Token::And {
            self.advance();
            let right = self.parse_comparison()?;
            left = AstNode::BinaryOp {
                op: BinaryOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_and()?;
        while *self.current() == Token::Or {
            self.advance();
            let right = self.parse_and()?;
            left = AstNode::BinaryOp {
                op: BinaryOperator::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_ternary(&mut self) -> Result<AstNode, String> {
        let condition = self.parse_or()?;
        if *self.current() != Token::Question {
            return Ok(condition);
        }
        self.advance();
        self.descend()?;
        let then_branch = self.parse_or()?;
        self.expect(Token::Colon)?;
        let else_branch = self.parse_ternary()?;
        self.depth -= 1;
        Ok(AstNode::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parse_sequence(&mut self) -> Result<AstNode, String> {
        let mut items = vec![self.parse_ternary()?];
        while *self.current() == Token::Semicolon {
            self.advance();
            if matches!(self.current(), Token::Eof | Token::RightParen) {
                break;
            }
            items.push(self.parse_ternary()?);
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(AstNode::Sequence(items))
        }
    }

    pub fn parse(&mut self) -> Result<AstNode, String> {
        let expr = self.parse_sequence()?;
        if *self.current() != Token::Eof {
            return Err(format!("Unexpected token after expression: {}", self.current()));
        }
        Ok(expr)
    }
}

/// Default nesting limit for parenthesized and ternary expressions.
pub const MAX_NESTED_DEPTH: u8 = 8;

pub fn parse_script(script: &str) -> Result<AstNode, String> {
    let tokens = Tokenizer::new(script).tokenize()?;
    Parser::new(tokens, MAX_NESTED_DEPTH).parse()
}
