//! Newick parsing and serialization.
//!
//! The grammar accepted here is the practical core of the format:
//! arbitrarily nested clades, optional internal and leaf labels (quoted or
//! unquoted), optional branch lengths, and bracketed comments (which are
//! stripped before parsing, so rooting annotations like `[&R]` are
//! tolerated anywhere). Output never carries a rooting annotation.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char as pchar, multispace0},
    combinator::opt,
    multi::separated_list1,
    number::complete::double,
    sequence::{delimited, preceded},
    IResult,
};

use crate::tree::{NodeId, Tree};
use crate::PhyloError;

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug)]
enum Ast {
    Leaf {
        label: String,
        length: f64,
    },
    Clade {
        children: Vec<Ast>,
        label: Option<String>,
        length: f64,
    },
}

fn is_unquoted_char(c: char) -> bool {
    !c.is_whitespace() && !"(),:;[]'".contains(c)
}

fn unquoted_label(input: &str) -> IResult<&str, String> {
    let (rest, raw) = take_while1(is_unquoted_char)(input)?;
    Ok((rest, raw.to_owned()))
}

/// Single-quoted label; an embedded quote is written as `''`.
fn quoted_label(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = pchar('\'')(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    rest,
                    nom::error::ErrorKind::Char,
                )))
            }
            Some(pos) => {
                out.push_str(&rest[..pos]);
                rest = &rest[pos + 1..];
                if let Some(stripped) = rest.strip_prefix('\'') {
                    out.push('\'');
                    rest = stripped;
                } else {
                    return Ok((rest, out));
                }
            }
        }
    }
}

fn label(input: &str) -> IResult<&str, String> {
    alt((quoted_label, unquoted_label))(input)
}

fn branch_length(input: &str) -> IResult<&str, f64> {
    preceded(
        delimited(multispace0, pchar(':'), multispace0),
        double,
    )(input)
}

fn leaf(input: &str) -> IResult<&str, Ast> {
    let (rest, name) = label(input)?;
    let (rest, len) = opt(branch_length)(rest)?;
    Ok((
        rest,
        Ast::Leaf {
            label: name,
            length: len.unwrap_or(0.0),
        },
    ))
}

fn clade(input: &str) -> IResult<&str, Ast> {
    let (rest, children) = delimited(
        preceded(multispace0, pchar('(')),
        separated_list1(delimited(multispace0, pchar(','), multispace0), subtree),
        preceded(multispace0, pchar(')')),
    )(input)?;
    let (rest, name) = opt(preceded(multispace0, label))(rest)?;
    let (rest, len) = opt(branch_length)(rest)?;
    Ok((
        rest,
        Ast::Clade {
            children,
            label: name,
            length: len.unwrap_or(0.0),
        },
    ))
}

fn subtree(input: &str) -> IResult<&str, Ast> {
    preceded(multispace0, alt((clade, leaf)))(input)
}

fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut depth = 0usize;
    for c in input.chars() {
        match c {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn build(tree: &mut Tree, parent: NodeId, ast: Ast) {
    match ast {
        Ast::Leaf { label, length } => {
            tree.add_child(parent, Some(label), length);
        }
        Ast::Clade {
            children,
            label,
            length,
        } => {
            let id = tree.add_child(parent, label, length);
            for child in children {
                build(tree, id, child);
            }
        }
    }
}

/// Parse a single Newick tree. Node ages are *not* computed here; callers
/// that need them run [`Tree::compute_ages`] after parsing.
pub fn parse(input: &str) -> Result<Tree, PhyloError> {
    let cleaned = strip_comments(input);
    let (rest, ast) = subtree(cleaned.as_str())
        .map_err(|e| PhyloError::Parse(format!("invalid newick: {e}")))?;
    let (rest, _) = delimited(multispace0::<&str, nom::error::Error<&str>>, tag(";"), multispace0)(rest)
        .map_err(|_e| PhyloError::Parse("expected terminating ';'".to_owned()))?;
    if !rest.trim().is_empty() {
        return Err(PhyloError::Parse(format!(
            "trailing content after tree: {:?}",
            rest.trim()
        )));
    }

    match ast {
        Ast::Clade {
            children,
            label,
            length: _,
        } => {
            let mut tree = Tree::with_root(label);
            let root = tree.root();
            for child in children {
                build(&mut tree, root, child);
            }
            Ok(tree)
        }
        Ast::Leaf { label, .. } => Ok(Tree::with_root(Some(label))),
    }
}

// ============================================================================
// Serialization
// ============================================================================

fn needs_quoting(label: &str) -> bool {
    label.is_empty() || label.chars().any(|c| !is_unquoted_char(c))
}

fn push_label(out: &mut String, label: &str) {
    if needs_quoting(label) {
        out.push('\'');
        out.push_str(&label.replace('\'', "''"));
        out.push('\'');
    } else {
        out.push_str(label);
    }
}

fn push_node(tree: &Tree, id: NodeId, with_lengths: bool, out: &mut String) {
    if !tree.is_leaf(id) {
        out.push('(');
        for (i, &c) in tree.children(id).iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_node(tree, c, with_lengths, out);
        }
        out.push(')');
    }
    if let Some(l) = tree.label(id) {
        push_label(out, l);
    }
    if with_lengths && tree.parent(id).is_some() {
        out.push(':');
        out.push_str(&format!("{}", tree.length(id)));
    }
}

/// Serialize with branch lengths. No rooting annotation is emitted.
pub fn write(tree: &Tree) -> String {
    let mut out = String::new();
    push_node(tree, tree.root(), true, &mut out);
    out.push(';');
    out
}

/// Serialize topology and labels only (taxonomy trees carry no lengths).
pub fn write_topology(tree: &Tree) -> String {
    let mut out = String::new();
    push_node(tree, tree.root(), false, &mut out);
    out.push(';');
    out
}
