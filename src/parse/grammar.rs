use winnow::ascii::{till_line_ending, Caseless};
use winnow::combinator::{alt, cut_err, delimited, not, opt, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode, ModalResult, ParserError, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::Stream;
use winnow::token::{any, one_of, take_while};

use crate::types::{
    resolve_env, BoolExpr, BoolOp, GenericItem, ItemKind, ItemTreeBuilder, SetExpr, SetOp,
    SyntaxOp,
};

use super::error::ParseError;

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ('#', till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

const RESERVED: [&str; 7] = ["and", "or", "not", "union", "inter", "true", "false"];

fn class_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    ident
        .verify(|s: &str| !RESERVED.iter().any(|k| s.eq_ignore_ascii_case(k)))
        .parse_next(input)
}

fn keyword<'i>(kw: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(Caseless(kw), not(one_of(is_ident_char)))
}

fn structural(input: &&str) -> ErrMode<ContextError> {
    ErrMode::from_input(input).cut()
}

// -- Values -----------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(StrContext::Expected(StrContextValue::CharLiteral('"')))
            .parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    '"' => s.push('"'),
                    '\\' => s.push('\\'),
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn bare_value<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && !matches!(c, ';' | ',' | '(' | ')' | '{' | '}' | '"' | '#')
    })
    .parse_next(input)
}

fn env_reference(input: &mut &str) -> ModalResult<String> {
    let name = ('$', ident).map(|(_, n)| n).parse_next(input)?;
    Ok(resolve_env(name).0)
}

fn value(input: &mut &str) -> ModalResult<String> {
    ws.parse_next(input)?;
    alt((
        string_literal,
        env_reference,
        bare_value.map(str::to_owned),
    ))
    .context(StrContext::Expected(StrContextValue::Description("value")))
    .parse_next(input)
}

fn arg_list(input: &mut &str) -> ModalResult<Vec<String>> {
    delimited(
        '(',
        separated(0.., value, (ws, ',')),
        (ws, cut_err(')')),
    )
    .parse_next(input)
}

// -- Comparison operators ---------------------------------------------------

fn syntax_op(input: &mut &str) -> ModalResult<SyntaxOp> {
    ws.parse_next(input)?;
    alt((
        "==".value(SyntaxOp::Eq),
        "!=".value(SyntaxOp::Ne),
        "<>".value(SyntaxOp::Ne),
        ">=".value(SyntaxOp::Ge),
        ">".value(SyntaxOp::Gt),
        "<=".value(SyntaxOp::Le),
        "<".value(SyntaxOp::Lt),
    ))
    .parse_next(input)
}

/// Policy text grammar. Holds the whole source so every item can be stamped with
/// the line it starts on.
pub(crate) struct Grammar<'s> {
    src: &'s str,
    line_starts: Vec<usize>,
}

type Chain<'s> = fn(&Grammar<'s>, &mut &'s str) -> ModalResult<GenericItem>;

impl<'s> Grammar<'s> {
    pub(crate) fn new(src: &'s str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { src, line_starts }
    }

    fn offset(&self, input: &&'s str) -> usize {
        self.src.len() - input.len()
    }

    fn line(&self, input: &&'s str) -> u32 {
        let offset = self.offset(input);
        let line = self.line_starts.partition_point(|&start| start <= offset);
        u32::try_from(line).unwrap_or(u32::MAX)
    }

    fn builder(&self, input: &&'s str) -> ItemTreeBuilder {
        ItemTreeBuilder::at_line(self.line(input))
    }

    fn error(&self, offset: usize, message: String) -> ParseError {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let start = self.line_starts[line.saturating_sub(1)];
        let column = self.src[start..offset.min(self.src.len())].chars().count() + 1;
        let message = if message.is_empty() {
            "unexpected input".to_owned()
        } else {
            message
        };
        ParseError::new(
            u32::try_from(line).unwrap_or(u32::MAX),
            u32::try_from(column).unwrap_or(u32::MAX),
            message,
        )
    }

    // -- Boolean expressions (precedence: OR < AND < NOT < primary) ---------

    fn chain(
        &self,
        input: &mut &'s str,
        kw: &'static str,
        next: Chain<'s>,
        combine: impl Fn(
            &ItemTreeBuilder,
            GenericItem,
            GenericItem,
        ) -> Result<GenericItem, crate::CompileError>,
    ) -> ModalResult<GenericItem> {
        let mut left = next(self, input)?;
        loop {
            let checkpoint = input.checkpoint();
            ws.parse_next(input)?;
            let b = self.builder(input);
            if opt(keyword(kw)).parse_next(input)?.is_none() {
                input.reset(&checkpoint);
                return Ok(left);
            }
            let right = cut_err(|i: &mut &'s str| next(self, i)).parse_next(input)?;
            left = combine(&b, left, right).map_err(|_| structural(input))?;
        }
    }

    fn bool_expr(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        self.chain(input, "or", Self::and_expr, |b, l, r| {
            b.create_binary_bool(BoolOp::Or, l, r)
        })
    }

    fn and_expr(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        self.chain(input, "and", Self::not_expr, |b, l, r| {
            b.create_binary_bool(BoolOp::And, l, r)
        })
    }

    fn not_expr(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        ws.parse_next(input)?;
        let b = self.builder(input);
        if opt(keyword("not")).parse_next(input)?.is_some() {
            let inner = self.not_expr(input)?;
            return b
                .create_unary_bool(BoolOp::Not, inner)
                .map_err(|_| structural(input));
        }
        self.bool_primary(input)
    }

    fn bool_primary(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        ws.parse_next(input)?;
        let b = self.builder(input);
        if opt('(').parse_next(input)?.is_some() {
            let inner = self.bool_expr(input)?;
            (ws, ')').parse_next(input)?;
            return b
                .create_unary_bool(BoolOp::Identity, inner)
                .map_err(|_| structural(input));
        }
        if opt(keyword("true")).parse_next(input)?.is_some() {
            return Ok(b.create_constant(true));
        }
        if opt(keyword("false")).parse_next(input)?.is_some() {
            return Ok(b.create_constant(false));
        }
        self.condition(input)
    }

    fn condition(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        ws.parse_next(input)?;
        let b = self.builder(input);
        let var = ident.parse_next(input)?;
        let op = syntax_op.parse_next(input)?;
        let val = cut_err(value).parse_next(input)?;
        Ok(b.create_condition(var, op, &val))
    }

    // -- Set expressions (precedence: UNION < INTER < NOT < primary) --------

    fn set_expr(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        self.chain(input, "union", Self::inter_expr, |b, l, r| {
            b.create_set_binary(SetOp::Union, l, r)
        })
    }

    fn inter_expr(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        self.chain(input, "inter", Self::set_unary, |b, l, r| {
            b.create_set_binary(SetOp::Inter, l, r)
        })
    }

    fn set_unary(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        ws.parse_next(input)?;
        let b = self.builder(input);
        if opt(keyword("not")).parse_next(input)?.is_some() {
            let inner = self.set_unary(input)?;
            return b
                .create_set_unary(SetOp::Not, inner)
                .map_err(|_| structural(input));
        }
        if opt('(').parse_next(input)?.is_some() {
            let inner = self.set_expr(input)?;
            (ws, ')').parse_next(input)?;
            return Ok(inner);
        }
        let name = class_name.parse_next(input)?;
        Ok(b.create_set_singleton(name))
    }

    // -- Items ---------------------------------------------------------------

    /// `{ bool-expr }`, `{ set-expr }` or `{ item* }`; the opening brace is consumed.
    fn block_body(&self, input: &mut &'s str) -> ModalResult<Vec<GenericItem>> {
        alt((
            terminated(|i: &mut &'s str| self.bool_expr(i), (ws, '}')).map(|e| vec![e]),
            terminated(|i: &mut &'s str| self.set_expr(i), (ws, '}')).map(|e| vec![e]),
            terminated(
                |i: &mut &'s str| self.item_list(i),
                (
                    ws,
                    cut_err('}').context(StrContext::Expected(StrContextValue::CharLiteral('}'))),
                ),
            ),
        ))
        .parse_next(input)
    }

    fn item_list(&self, input: &mut &'s str) -> ModalResult<Vec<GenericItem>> {
        repeat(0.., |i: &mut &'s str| self.item(i)).parse_next(input)
    }

    fn item(&self, input: &mut &'s str) -> ModalResult<GenericItem> {
        ws.parse_next(input)?;
        let b = self.builder(input);
        let name = ident.parse_next(input)?;
        ws.parse_next(input)?;

        if opt(terminated('=', not('='))).parse_next(input)?.is_some() {
            let val = cut_err(value).parse_next(input)?;
            ws.parse_next(input)?;
            let args = opt(arg_list).parse_next(input)?;
            (
                ws,
                cut_err(';').context(StrContext::Expected(StrContextValue::CharLiteral(';'))),
            )
                .parse_next(input)?;
            let mut item = b.create_assignment(name, &val);
            if let Some(args) = args {
                b.attach_arg_list(&mut item, args)
                    .map_err(|_| structural(input))?;
            }
            return Ok(item);
        }

        let id = opt(alt((string_literal, bare_value.map(str::to_owned)))).parse_next(input)?;
        (
            ws,
            cut_err('{').context(StrContext::Expected(StrContextValue::CharLiteral('{'))),
        )
            .parse_next(input)?;
        let children = self.block_body(input)?;

        // the builder prepends; feed it back to front to keep source order
        let mut list = b.new_list();
        for child in children.into_iter().rev() {
            b.append_to_list(&mut list, child);
        }
        Ok(b.create_block(name, id.as_deref(), Some(list)))
    }

    fn items(&self, input: &mut &'s str) -> ModalResult<Vec<GenericItem>> {
        let items = self.item_list(input)?;
        ws.parse_next(input)?;
        Ok(items)
    }

    fn standalone(&self, input: &mut &'s str, next: Chain<'s>) -> ModalResult<GenericItem> {
        let item = next(self, input)?;
        ws.parse_next(input)?;
        Ok(item)
    }

    // -- Entry points ----------------------------------------------------------

    pub(crate) fn parse_items(&self) -> Result<Vec<GenericItem>, ParseError> {
        let mut parser = |i: &mut &'s str| self.items(i);
        parser
            .parse(self.src)
            .map_err(|e| self.error(e.offset(), e.inner().to_string()))
    }

    pub(crate) fn parse_bool(&self) -> Result<BoolExpr, ParseError> {
        let mut parser = |i: &mut &'s str| self.standalone(i, Self::bool_expr);
        let item = parser
            .parse(self.src)
            .map_err(|e| self.error(e.offset(), e.inner().to_string()))?;
        match item.kind {
            ItemKind::Bool(b) => Ok(b),
            _ => Err(self.error(0, "boolean expression expected".to_owned())),
        }
    }

    pub(crate) fn parse_set(&self) -> Result<SetExpr, ParseError> {
        let mut parser = |i: &mut &'s str| self.standalone(i, Self::set_expr);
        let item = parser
            .parse(self.src)
            .map_err(|e| self.error(e.offset(), e.inner().to_string()))?;
        match item.kind {
            ItemKind::Set(s) => Ok(s),
            _ => Err(self.error(0, "set expression expected".to_owned())),
        }
    }
}
