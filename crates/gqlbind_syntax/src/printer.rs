//! Printing documents back to GraphQL text.
//!
//! Two layouts are supported: the pretty layout used by `gqlbind fmt` and
//! composed documents, and a single-line compact layout used on the wire.

use crate::ast::*;

/// Printing options.
#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Number of spaces for indentation.
    pub indent_size: usize,
    /// Use tabs instead of spaces.
    pub use_tabs: bool,
    /// Print everything on one line with minimal whitespace.
    pub compact: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            indent_size: 2,
            use_tabs: false,
            compact: false,
        }
    }
}

impl PrintOptions {
    #[must_use]
    pub fn compact() -> Self {
        Self {
            compact: true,
            ..Self::default()
        }
    }
}

/// Document printer.
pub struct Printer {
    options: PrintOptions,
    output: String,
    indent: usize,
}

impl Printer {
    pub fn new(options: PrintOptions) -> Self {
        Self {
            options,
            output: String::new(),
            indent: 0,
        }
    }

    /// Prints a document.
    pub fn print(&mut self, document: &Document) -> String {
        self.output.clear();
        for (i, def) in document.definitions.iter().enumerate() {
            if i > 0 {
                self.definition_separator();
            }
            self.print_definition_inner(def);
        }
        std::mem::take(&mut self.output)
    }

    /// Prints a single definition.
    pub fn print_definition(&mut self, def: &Definition) -> String {
        self.output.clear();
        self.print_definition_inner(def);
        std::mem::take(&mut self.output)
    }

    fn definition_separator(&mut self) {
        if self.options.compact {
            self.output.push(' ');
        } else {
            self.output.push_str("\n\n");
        }
    }

    fn print_definition_inner(&mut self, def: &Definition) {
        match def {
            Definition::Operation(op) => self.print_operation(op),
            Definition::Fragment(frag) => self.print_fragment(frag),
        }
    }

    fn print_operation(&mut self, op: &OperationDefinition) {
        let plain_shorthand = op.shorthand
            && op.name.is_none()
            && op.variables.is_empty()
            && op.directives.is_empty();

        if !plain_shorthand {
            self.output.push_str(op.operation.as_str());
            if let Some(name) = &op.name {
                self.output.push(' ');
                self.output.push_str(&name.value);
            }
            if !op.variables.is_empty() {
                self.output.push('(');
                for (i, var) in op.variables.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.print_variable(var);
                }
                self.output.push(')');
            }
            self.print_directives(&op.directives);
            self.output.push(' ');
        }

        self.print_selection_set(&op.selection_set);
    }

    fn print_variable(&mut self, var: &VariableDefinition) {
        self.output.push('$');
        self.output.push_str(&var.name.value);
        self.output.push_str(": ");
        self.output.push_str(&var.ty.to_string());
        if let Some(default) = &var.default_value {
            self.output.push_str(" = ");
            self.print_value(default);
        }
        self.print_directives(&var.directives);
    }

    fn print_fragment(&mut self, frag: &FragmentDefinition) {
        self.output.push_str("fragment ");
        self.output.push_str(&frag.name.value);
        self.output.push_str(" on ");
        self.output.push_str(&frag.type_condition.value);
        self.print_directives(&frag.directives);
        self.output.push(' ');
        self.print_selection_set(&frag.selection_set);
    }

    fn print_selection_set(&mut self, set: &SelectionSet) {
        if self.options.compact {
            self.output.push('{');
            for selection in &set.selections {
                self.output.push(' ');
                self.print_selection(selection);
            }
            self.output.push_str(" }");
            return;
        }

        self.output.push_str("{\n");
        self.indent += 1;
        for selection in &set.selections {
            self.push_indent();
            self.print_selection(selection);
            self.output.push('\n');
        }
        self.indent -= 1;
        self.push_indent();
        self.output.push('}');
    }

    fn print_selection(&mut self, selection: &Selection) {
        match selection {
            Selection::Field(field) => self.print_field(field),
            Selection::FragmentSpread(spread) => {
                self.output.push_str("...");
                self.output.push_str(&spread.name.value);
                self.print_directives(&spread.directives);
            }
            Selection::InlineFragment(inline) => {
                self.output.push_str("...");
                if let Some(type_condition) = &inline.type_condition {
                    self.output.push_str(" on ");
                    self.output.push_str(&type_condition.value);
                }
                self.print_directives(&inline.directives);
                self.output.push(' ');
                self.print_selection_set(&inline.selection_set);
            }
        }
    }

    fn print_field(&mut self, field: &Field) {
        if let Some(alias) = &field.alias {
            self.output.push_str(&alias.value);
            self.output.push_str(": ");
        }
        self.output.push_str(&field.name.value);
        self.print_arguments(&field.arguments);
        self.print_directives(&field.directives);
        if let Some(set) = &field.selection_set {
            self.output.push(' ');
            self.print_selection_set(set);
        }
    }

    fn print_arguments(&mut self, arguments: &[Argument]) {
        if arguments.is_empty() {
            return;
        }
        self.output.push('(');
        for (i, arg) in arguments.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            self.output.push_str(&arg.name.value);
            self.output.push_str(": ");
            self.print_value(&arg.value);
        }
        self.output.push(')');
    }

    fn print_directives(&mut self, directives: &[Directive]) {
        for directive in directives {
            self.output.push_str(" @");
            self.output.push_str(&directive.name.value);
            self.print_arguments(&directive.arguments);
        }
    }

    fn print_value(&mut self, value: &Value) {
        match value {
            Value::Variable(name) => {
                self.output.push('$');
                self.output.push_str(&name.value);
            }
            Value::Int(v, _) => self.output.push_str(&v.to_string()),
            // Debug keeps a fractional part or exponent so the literal stays a float.
            Value::Float(v, _) => self.output.push_str(&format!("{v:?}")),
            Value::String(s, _) => push_quoted(&mut self.output, s),
            Value::Boolean(b, _) => self.output.push_str(if *b { "true" } else { "false" }),
            Value::Null(_) => self.output.push_str("null"),
            Value::Enum(name) => self.output.push_str(&name.value),
            Value::List(items, _) => {
                self.output.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.print_value(item);
                }
                self.output.push(']');
            }
            Value::Object(fields, _) => {
                self.output.push('{');
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.output.push_str(&name.value);
                    self.output.push_str(": ");
                    self.print_value(value);
                }
                self.output.push('}');
            }
        }
    }

    fn push_indent(&mut self) {
        if self.options.use_tabs {
            for _ in 0..self.indent {
                self.output.push('\t');
            }
        } else {
            let n = self.indent * self.options.indent_size;
            self.output.extend(std::iter::repeat(' ').take(n));
        }
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Prints a document with the pretty layout.
pub fn print(document: &Document) -> String {
    Printer::new(PrintOptions::default()).print(document)
}

/// Prints a document on a single line.
pub fn print_compact(document: &Document) -> String {
    Printer::new(PrintOptions::compact()).print(document)
}

/// Prints a document with custom options.
pub fn print_with_options(document: &Document, options: PrintOptions) -> String {
    Printer::new(options).print(document)
}
