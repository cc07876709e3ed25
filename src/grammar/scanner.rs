//! Tokenizer and block tree builder for the proxy's configuration syntax.
//!
//! # Design Decisions
//! - Lenient: stray `}` are ignored, unclosed blocks close at end of input,
//!   words with no terminating `;` are dropped
//! - Quotes are kept inside tokens so opaque values round-trip verbatim
//! - `#` starts a comment outside quotes

/// A statement of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// `name arg...;`
    Directive { name: String, args: Vec<String> },
    /// `name arg... { children }`
    Block {
        name: String,
        args: Vec<String>,
        children: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    End,
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_comment = false;

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token::Word(std::mem::take(current)));
        }
    };

    for c in input.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }

        if let Some(open) = quote {
            current.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '#' => {
                flush(&mut current, &mut tokens);
                in_comment = true;
            }
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '{' | '}' | ';' => {
                flush(&mut current, &mut tokens);
                tokens.push(match c {
                    '{' => Token::Open,
                    '}' => Token::Close,
                    _ => Token::End,
                });
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

struct OpenBlock {
    name: String,
    args: Vec<String>,
    children: Vec<Node>,
}

/// Build the statement tree of a configuration text.
pub fn scan(input: &str) -> Vec<Node> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();
    let mut words: Vec<String> = Vec::new();

    for token in tokenize(input) {
        match token {
            Token::Word(word) => words.push(word),
            Token::End => {
                if let Some((name, args)) = split_words(&mut words) {
                    let node = Node::Directive { name, args };
                    match stack.last_mut() {
                        Some(block) => block.children.push(node),
                        None => root.push(node),
                    }
                }
            }
            Token::Open => {
                let (name, args) = split_words(&mut words).unwrap_or_default();
                stack.push(OpenBlock {
                    name,
                    args,
                    children: Vec::new(),
                });
            }
            Token::Close => {
                if !words.is_empty() {
                    tracing::debug!(words = ?words, "Dropping unterminated statement");
                    words.clear();
                }
                match stack.pop() {
                    Some(block) => close_block(block, &mut stack, &mut root),
                    None => tracing::debug!("Ignoring unmatched '}}'"),
                }
            }
        }
    }

    if !words.is_empty() {
        tracing::debug!(words = ?words, "Dropping unterminated statement at end of input");
    }
    while let Some(block) = stack.pop() {
        tracing::debug!(block = %block.name, "Closing unterminated block at end of input");
        close_block(block, &mut stack, &mut root);
    }
    root
}

fn split_words(words: &mut Vec<String>) -> Option<(String, Vec<String>)> {
    if words.is_empty() {
        return None;
    }
    let mut args = std::mem::take(words);
    let name = args.remove(0);
    Some((name, args))
}

fn close_block(block: OpenBlock, stack: &mut [OpenBlock], root: &mut Vec<Node>) {
    let node = Node::Block {
        name: block.name,
        args: block.args,
        children: block.children,
    };
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => root.push(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(name: &str, args: &[&str]) -> Node {
        Node::Directive {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_nested_blocks() {
        let nodes = scan("server { listen 80; location /a { proxy_pass http://u; } }");
        assert_eq!(
            nodes,
            vec![Node::Block {
                name: "server".into(),
                args: vec![],
                children: vec![
                    directive("listen", &["80"]),
                    Node::Block {
                        name: "location".into(),
                        args: vec!["/a".into()],
                        children: vec![directive("proxy_pass", &["http://u"])],
                    },
                ],
            }]
        );
    }

    #[test]
    fn test_comments_are_stripped() {
        let nodes = scan("# header\nlisten 80; # trailing\n#listen 81;\n");
        assert_eq!(nodes, vec![directive("listen", &["80"])]);
    }

    #[test]
    fn test_quotes_keep_structural_characters() {
        let nodes = scan("add_header X-Test \"a; b {c} # d\";");
        assert_eq!(nodes, vec![directive("add_header", &["X-Test", "\"a; b {c} # d\""])]);
    }

    #[test]
    fn test_lenient_structure() {
        let nodes = scan("} upstream u { server a; least_conn");
        assert_eq!(
            nodes,
            vec![Node::Block {
                name: "upstream".into(),
                args: vec!["u".into()],
                children: vec![directive("server", &["a"])],
            }]
        );
    }

    #[test]
    fn test_bare_directive() {
        assert_eq!(scan("ip_hash;"), vec![directive("ip_hash", &[])]);
    }
}
