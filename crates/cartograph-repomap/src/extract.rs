//! Symbol extraction.
//!
//! [`SymbolExtractor`] is the seam between the cache layers and whatever
//! produces definitions and references for a file. The built-in
//! [`TreeSitterExtractor`] walks a tree-sitter syntax tree using one rule
//! table per language: a node kind either introduces a definition, opens a
//! container (functions inside become methods), or both. Every other
//! identifier-like leaf becomes a reference.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser};

use crate::symbols::{OccurrenceKind, SymbolOccurrence, SymbolType};
use crate::walker::Language;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// Why a file produced no symbols.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("binary content")]
    Binary,

    #[error("file is not valid UTF-8")]
    InvalidUtf8,

    #[error("no grammar for {0}")]
    UnsupportedLanguage(PathBuf),

    #[error("grammar error: {0}")]
    Grammar(String),

    #[error("parser produced no syntax tree")]
    NoTree,

    #[error("read failed: {0}")]
    Io(String),
}

/// Produces definitions and references for one file.
///
/// Implementations must be deterministic for identical input and safe to call
/// from several worker threads at once.
pub trait SymbolExtractor: Send + Sync {
    /// Stable identity of this extractor and its version.
    ///
    /// Folded into every cache key, so changing it invalidates cached results.
    fn id(&self) -> &str;

    /// Extract occurrences from `text`, the contents of `path` (relative to
    /// the repository root).
    fn extract(&self, path: &Path, text: &str) -> Result<Vec<SymbolOccurrence>, ExtractionError>;
}

/// Decode raw file bytes into text, rejecting binary and non-UTF-8 content.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::extract::{decode_source, ExtractionError};
///
/// assert_eq!(decode_source(b"x = 1".to_vec()).unwrap(), "x = 1");
/// assert_eq!(decode_source(vec![b'a', 0, b'b']), Err(ExtractionError::Binary));
/// assert_eq!(decode_source(vec![0xff, 0xfe]), Err(ExtractionError::InvalidUtf8));
/// ```
pub fn decode_source(bytes: Vec<u8>) -> Result<String, ExtractionError> {
    let check_len = bytes.len().min(BINARY_CHECK_SIZE);
    if bytes[..check_len].contains(&0) {
        return Err(ExtractionError::Binary);
    }
    String::from_utf8(bytes).map_err(|_| ExtractionError::InvalidUtf8)
}

/// Extractor backed by the bundled tree-sitter grammars.
///
/// Syntax errors are tolerated: whatever tree-sitter recovers is reported.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cartograph_repomap::extract::{SymbolExtractor, TreeSitterExtractor};
///
/// let extractor = TreeSitterExtractor::new();
/// let occurrences = extractor
///     .extract(Path::new("main.py"), "from utils import add\n\nprint(add(1, 2))\n")
///     .unwrap();
/// assert!(occurrences.iter().any(|o| o.is_reference() && o.name == "add"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TreeSitterExtractor;

impl TreeSitterExtractor {
    pub const ID: &'static str = "tree-sitter/1";

    pub fn new() -> Self {
        Self
    }
}

thread_local! {
    static PARSER: RefCell<Parser> = RefCell::new(Parser::new());
}

impl SymbolExtractor for TreeSitterExtractor {
    fn id(&self) -> &str {
        Self::ID
    }

    fn extract(&self, path: &Path, text: &str) -> Result<Vec<SymbolOccurrence>, ExtractionError> {
        let language = Language::from_path(path);
        let Some(grammar) = language.tree_sitter_language() else {
            return Err(ExtractionError::UnsupportedLanguage(path.to_path_buf()));
        };

        let tree = PARSER.with(|parser| {
            let mut parser = parser.borrow_mut();
            parser
                .set_language(&grammar)
                .map_err(|e| ExtractionError::Grammar(e.to_string()))?;
            parser.parse(text, None).ok_or(ExtractionError::NoTree)
        })?;

        let mut collector = Collector {
            rules: rules_for(language),
            source: text.as_bytes(),
            file: path,
            definition_names: HashSet::new(),
            occurrences: Vec::new(),
        };
        collector.collect(tree.root_node());
        Ok(collector.occurrences)
    }
}

/// Where a definition's name lives relative to the defining node.
#[derive(Debug, Clone, Copy)]
enum NameSource {
    /// Container-only rule; no definition is emitted.
    None,
    /// First direct child of one of these kinds, falling back to the `name`
    /// field.
    Child(&'static [&'static str]),
    /// Follow `declarator` fields down to a plain identifier (C family).
    Declarator,
    /// The `left` side of an assignment when it is a bare identifier.
    AssignmentTarget,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    node: &'static str,
    symbol_type: SymbolType,
    name: NameSource,
    /// Functions nested under this node are methods.
    container: bool,
    /// Only record outside function bodies.
    top_level: bool,
    /// Skip unless this field is present (e.g. a struct body).
    requires: Option<&'static str>,
    /// Record as a function when the `value` field holds a function literal.
    callable_value: bool,
}

const fn def(node: &'static str, symbol_type: SymbolType, name: NameSource) -> Rule {
    Rule {
        node,
        symbol_type,
        name,
        container: false,
        top_level: false,
        requires: None,
        callable_value: false,
    }
}

const fn container(node: &'static str) -> Rule {
    def(node, SymbolType::Class, NameSource::None).container()
}

impl Rule {
    const fn container(self) -> Self {
        Rule {
            container: true,
            ..self
        }
    }

    const fn top_level(self) -> Self {
        Rule {
            top_level: true,
            ..self
        }
    }

    const fn requires(self, field: &'static str) -> Self {
        Rule {
            requires: Some(field),
            ..self
        }
    }

    const fn callable_value(self) -> Self {
        Rule {
            callable_value: true,
            ..self
        }
    }

    fn is_function(&self) -> bool {
        matches!(self.symbol_type, SymbolType::Function | SymbolType::Method)
    }
}

use NameSource::{AssignmentTarget, Child, Declarator};
use SymbolType::{Class, Function, Method, Module, Variable};

const IDENT: &[&str] = &["identifier"];
const TYPE_IDENT: &[&str] = &["type_identifier"];
const CLASS_NAME: &[&str] = &["identifier", "type_identifier"];
const RUBY_NAME: &[&str] = &["constant", "scope_resolution"];
const PHP_NAME: &[&str] = &["name"];
const KOTLIN_FN: &[&str] = &["simple_identifier", "identifier"];
const KOTLIN_TYPE: &[&str] = &["type_identifier", "simple_identifier", "identifier"];
const SWIFT_FN: &[&str] = &["simple_identifier"];
const SWIFT_TYPE: &[&str] = &["type_identifier", "simple_identifier"];

const RUST_RULES: &[Rule] = &[
    def("function_item", Function, Child(IDENT)),
    def("function_signature_item", Function, Child(IDENT)),
    def("struct_item", Class, Child(TYPE_IDENT)),
    def("enum_item", Class, Child(TYPE_IDENT)),
    def("union_item", Class, Child(TYPE_IDENT)),
    def("trait_item", Class, Child(TYPE_IDENT)).container(),
    def("type_item", Class, Child(TYPE_IDENT)),
    def("mod_item", Module, Child(IDENT)),
    def("const_item", Variable, Child(IDENT)),
    def("static_item", Variable, Child(IDENT)),
    def("macro_definition", Function, Child(IDENT)),
    container("impl_item"),
];

const PYTHON_RULES: &[Rule] = &[
    def("function_definition", Function, Child(IDENT)),
    def("class_definition", Class, Child(IDENT)).container(),
    def("assignment", Variable, AssignmentTarget).top_level(),
];

const JS_TS_RULES: &[Rule] = &[
    def("function_declaration", Function, Child(IDENT)),
    def("generator_function_declaration", Function, Child(IDENT)),
    def("class_declaration", Class, Child(CLASS_NAME)).container(),
    def("abstract_class_declaration", Class, Child(TYPE_IDENT)).container(),
    def(
        "method_definition",
        Method,
        Child(&["property_identifier", "private_property_identifier"]),
    ),
    def("method_signature", Method, Child(&["property_identifier"])),
    def("interface_declaration", Class, Child(TYPE_IDENT)).container(),
    def("type_alias_declaration", Class, Child(TYPE_IDENT)),
    def("enum_declaration", Class, Child(IDENT)),
    def("internal_module", Module, Child(IDENT)),
    def("variable_declarator", Variable, Child(IDENT))
        .top_level()
        .callable_value(),
];

const GO_RULES: &[Rule] = &[
    def("function_declaration", Function, Child(IDENT)),
    def("method_declaration", Method, Child(&["field_identifier"])),
    def("type_spec", Class, Child(TYPE_IDENT)),
    def("type_alias", Class, Child(TYPE_IDENT)),
    def("const_spec", Variable, Child(IDENT)).top_level(),
    def("var_spec", Variable, Child(IDENT)).top_level(),
];

const JAVA_RULES: &[Rule] = &[
    def("class_declaration", Class, Child(IDENT)).container(),
    def("interface_declaration", Class, Child(IDENT)).container(),
    def("enum_declaration", Class, Child(IDENT)).container(),
    def("record_declaration", Class, Child(IDENT)).container(),
    def("method_declaration", Method, Child(IDENT)),
    def("constructor_declaration", Method, Child(IDENT)),
];

const C_RULES: &[Rule] = &[
    def("function_definition", Function, Declarator),
    def("struct_specifier", Class, Child(TYPE_IDENT)).requires("body"),
    def("union_specifier", Class, Child(TYPE_IDENT)).requires("body"),
    def("enum_specifier", Class, Child(TYPE_IDENT)).requires("body"),
    def("type_definition", Class, Declarator),
];

const CPP_RULES: &[Rule] = &[
    def("function_definition", Function, Declarator),
    def("class_specifier", Class, Child(TYPE_IDENT))
        .requires("body")
        .container(),
    def("struct_specifier", Class, Child(TYPE_IDENT))
        .requires("body")
        .container(),
    def("union_specifier", Class, Child(TYPE_IDENT)).requires("body"),
    def("enum_specifier", Class, Child(TYPE_IDENT)).requires("body"),
    def("type_definition", Class, Declarator),
    def("namespace_definition", Module, Child(&["namespace_identifier"])),
];

const RUBY_RULES: &[Rule] = &[
    def("method", Function, Child(IDENT)),
    def("singleton_method", Method, Child(IDENT)),
    def("class", Class, Child(RUBY_NAME)).container(),
    def("module", Module, Child(RUBY_NAME)).container(),
];

const PHP_RULES: &[Rule] = &[
    def("function_definition", Function, Child(PHP_NAME)),
    def("method_declaration", Method, Child(PHP_NAME)),
    def("class_declaration", Class, Child(PHP_NAME)).container(),
    def("interface_declaration", Class, Child(PHP_NAME)).container(),
    def("trait_declaration", Class, Child(PHP_NAME)).container(),
    def("enum_declaration", Class, Child(PHP_NAME)).container(),
    def("namespace_definition", Module, Child(&["namespace_name"])),
];

const KOTLIN_RULES: &[Rule] = &[
    def("function_declaration", Function, Child(KOTLIN_FN)),
    def("class_declaration", Class, Child(KOTLIN_TYPE)).container(),
    def("object_declaration", Class, Child(KOTLIN_TYPE)).container(),
    def("interface_declaration", Class, Child(KOTLIN_TYPE)).container(),
];

const SWIFT_RULES: &[Rule] = &[
    def("function_declaration", Function, Child(SWIFT_FN)),
    def("protocol_function_declaration", Method, Child(SWIFT_FN)),
    def("class_declaration", Class, Child(SWIFT_TYPE)).container(),
    def("protocol_declaration", Class, Child(SWIFT_TYPE)).container(),
];

fn rules_for(language: Language) -> &'static [Rule] {
    match language {
        Language::Rust => RUST_RULES,
        Language::Python => PYTHON_RULES,
        Language::TypeScript | Language::Tsx | Language::JavaScript => JS_TS_RULES,
        Language::Go => GO_RULES,
        Language::Java => JAVA_RULES,
        Language::C => C_RULES,
        Language::Cpp => CPP_RULES,
        Language::Ruby => RUBY_RULES,
        Language::Php => PHP_RULES,
        Language::Kotlin => KOTLIN_RULES,
        Language::Swift => SWIFT_RULES,
        Language::Unknown => &[],
    }
}

/// Leaf kinds that name something.
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "shorthand_property_identifier",
    "simple_identifier",
    "namespace_identifier",
    "constant",
    "name",
];

/// Terminal kinds a C declarator chain can end in.
const DECLARATOR_LEAVES: &[&str] = &[
    "identifier",
    "field_identifier",
    "type_identifier",
    "destructor_name",
    "operator_name",
];

const FUNCTION_LITERALS: &[&str] = &[
    "arrow_function",
    "function_expression",
    "function",
    "generator_function",
];

#[derive(Debug, Clone, Copy, Default)]
struct Scope {
    in_container: bool,
    in_function: bool,
}

struct Collector<'a> {
    rules: &'static [Rule],
    source: &'a [u8],
    file: &'a Path,
    /// Node ids of definition names, excluded from references.
    definition_names: HashSet<usize>,
    occurrences: Vec<SymbolOccurrence>,
}

impl Collector<'_> {
    /// Pre-order walk over the whole tree. Nesting depth is bounded only by
    /// the input, so the walk keeps its own scope stack instead of recursing.
    fn collect(&mut self, root: Node) {
        let mut cursor = root.walk();
        // Scope applying to the children of each node on the current path.
        let mut scopes = vec![Scope::default()];
        loop {
            let scope = scopes.last().copied().unwrap_or_default();
            let child_scope = self.visit(cursor.node(), scope);
            if cursor.goto_first_child() {
                scopes.push(child_scope);
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    return;
                }
                scopes.pop();
            }
        }
    }

    /// Record `node` and return the scope its children are visited in.
    fn visit(&mut self, node: Node, scope: Scope) -> Scope {
        let mut child_scope = scope;
        let rules = self.rules;

        if let Some(rule) = rules.iter().find(|r| r.node == node.kind()) {
            self.record_definition(node, rule, scope);
            if rule.container {
                child_scope = Scope {
                    in_container: true,
                    in_function: false,
                };
            } else if rule.is_function() {
                child_scope = Scope {
                    in_container: false,
                    in_function: true,
                };
            }
        } else if node.child_count() == 0 && IDENTIFIER_KINDS.contains(&node.kind()) {
            self.record_reference(node);
        }
        child_scope
    }

    fn record_definition(&mut self, node: Node, rule: &Rule, scope: Scope) {
        if rule.top_level && scope.in_function {
            return;
        }
        if let Some(field) = rule.requires {
            if node.child_by_field_name(field).is_none() {
                return;
            }
        }
        let Some(name_node) = self.name_node(node, rule.name) else {
            return;
        };
        let name = self.text(name_node);
        if name.is_empty() {
            return;
        }

        let mut symbol_type = rule.symbol_type;
        if symbol_type == Function && scope.in_container {
            symbol_type = Method;
        }
        if rule.callable_value {
            let is_callable = node
                .child_by_field_name("value")
                .is_some_and(|v| FUNCTION_LITERALS.contains(&v.kind()));
            if is_callable {
                symbol_type = Function;
            }
        }

        self.definition_names.insert(name_node.id());
        self.occurrences.push(SymbolOccurrence {
            file: self.file.to_path_buf(),
            line_start: node.start_position().row as u32 + 1,
            line_end: node.end_position().row as u32 + 1,
            column: name_node.start_position().column as u32,
            kind: OccurrenceKind::Definition,
            symbol_type,
            name,
        });
    }

    fn record_reference(&mut self, node: Node) {
        if self.definition_names.contains(&node.id()) {
            return;
        }
        let name = self.text(node);
        if name.is_empty() {
            return;
        }
        let line = node.start_position().row as u32 + 1;
        self.occurrences.push(SymbolOccurrence {
            file: self.file.to_path_buf(),
            line_start: line,
            line_end: line,
            column: node.start_position().column as u32,
            kind: OccurrenceKind::Reference,
            symbol_type: reference_type(node),
            name,
        });
    }

    fn name_node<'t>(&self, node: Node<'t>, source: NameSource) -> Option<Node<'t>> {
        match source {
            NameSource::None => None,
            NameSource::Child(kinds) => {
                let mut cursor = node.walk();
                let found = node
                    .children(&mut cursor)
                    .find(|c| kinds.contains(&c.kind()));
                found.or_else(|| node.child_by_field_name("name"))
            }
            NameSource::Declarator => {
                let mut current = node.child_by_field_name("declarator")?;
                loop {
                    if DECLARATOR_LEAVES.contains(&current.kind()) {
                        return Some(current);
                    }
                    current = match current.kind() {
                        "qualified_identifier" => current.child_by_field_name("name")?,
                        _ => current.child_by_field_name("declarator")?,
                    };
                }
            }
            NameSource::AssignmentTarget => node
                .child_by_field_name("left")
                .filter(|left| left.kind() == "identifier"),
        }
    }

    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source)
            .map(str::to_string)
            .unwrap_or_default()
    }
}

fn reference_type(node: Node) -> SymbolType {
    match node.kind() {
        "type_identifier" | "constant" => return Class,
        "namespace_identifier" => return Module,
        _ => {}
    }
    let called = node.parent().is_some_and(|p| {
        let kind = p.kind();
        kind.contains("call") || kind.contains("invocation")
    });
    if called {
        Function
    } else {
        Variable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(path: &str, source: &str) -> Vec<SymbolOccurrence> {
        TreeSitterExtractor::new()
            .extract(Path::new(path), source)
            .unwrap()
    }

    fn defs(occurrences: &[SymbolOccurrence]) -> Vec<(String, SymbolType)> {
        occurrences
            .iter()
            .filter(|o| o.is_definition())
            .map(|o| (o.name.clone(), o.symbol_type))
            .collect()
    }

    fn has_def(occurrences: &[SymbolOccurrence], name: &str, ty: SymbolType) -> bool {
        defs(occurrences).contains(&(name.to_string(), ty))
    }

    fn has_ref(occurrences: &[SymbolOccurrence], name: &str) -> bool {
        occurrences
            .iter()
            .any(|o| o.is_reference() && o.name == name)
    }

    #[test]
    fn rust_definitions_and_methods() {
        let source = r#"
pub struct Config {
    name: String,
}

pub trait Shape {
    fn draw(&self);
}

impl Config {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

pub fn top_level(x: i32) -> bool {
    x > 0
}

const LIMIT: usize = 10;
"#;
        let occ = extract("src/lib.rs", source);
        assert!(has_def(&occ, "Config", Class));
        assert!(has_def(&occ, "Shape", Class));
        assert!(has_def(&occ, "draw", Method));
        assert!(has_def(&occ, "new", Method));
        assert!(has_def(&occ, "top_level", Function));
        assert!(has_def(&occ, "LIMIT", Variable));
        // impl blocks are containers, not definitions
        assert_eq!(
            defs(&occ).iter().filter(|(n, _)| n == "Config").count(),
            1
        );
        // the impl target is a reference to the struct
        assert!(has_ref(&occ, "Config"));
    }

    #[test]
    fn python_module_level_variables_only() {
        let source = r#"
TIMEOUT = 30

class Greeter:
    def greet(self):
        local = 1
        return local

def helper():
    inner = 2
    return inner
"#;
        let occ = extract("app.py", source);
        assert!(has_def(&occ, "TIMEOUT", Variable));
        assert!(has_def(&occ, "Greeter", Class));
        assert!(has_def(&occ, "greet", Method));
        assert!(has_def(&occ, "helper", Function));
        assert!(!has_def(&occ, "local", Variable));
        assert!(!has_def(&occ, "inner", Variable));
    }

    #[test]
    fn python_references_exclude_definition_names() {
        let source = "from utils import add\n\ndef main():\n    return add(1, 2)\n";
        let occ = extract("main.py", source);
        let add_refs: Vec<&SymbolOccurrence> = occ
            .iter()
            .filter(|o| o.is_reference() && o.name == "add")
            .collect();
        assert_eq!(add_refs.len(), 2);
        assert!(add_refs.iter().any(|o| o.symbol_type == Function));
        assert!(!has_ref(&occ, "main"));
        assert!(has_def(&occ, "main", Function));
    }

    #[test]
    fn typescript_classes_interfaces_and_arrow_functions() {
        let source = r#"
interface Shape {
    area(): number;
}

export class Circle implements Shape {
    area(): number { return 1; }
}

export const makeCircle = () => new Circle();
export const RADIUS = 2;
"#;
        let occ = extract("shapes.ts", source);
        assert!(has_def(&occ, "Shape", Class));
        assert!(has_def(&occ, "Circle", Class));
        assert!(has_def(&occ, "area", Method));
        assert!(has_def(&occ, "makeCircle", Function));
        assert!(has_def(&occ, "RADIUS", Variable));
        assert!(has_ref(&occ, "Shape"));
    }

    #[test]
    fn go_functions_methods_and_types() {
        let source = r#"
package main

type Server struct {
    port int
}

func (s *Server) Start() error {
    return nil
}

func NewServer() *Server {
    return &Server{port: 80}
}
"#;
        let occ = extract("main.go", source);
        assert!(has_def(&occ, "Server", Class));
        assert!(has_def(&occ, "Start", Method));
        assert!(has_def(&occ, "NewServer", Function));
    }

    #[test]
    fn java_methods_in_classes() {
        let source = r#"
public class Calculator {
    public Calculator() {}
    public int add(int a, int b) { return a + b; }
}

interface Operation {
    int apply(int a);
}
"#;
        let occ = extract("Calculator.java", source);
        assert!(has_def(&occ, "Calculator", Class));
        assert!(has_def(&occ, "add", Method));
        assert!(has_def(&occ, "Operation", Class));
    }

    #[test]
    fn c_declarators_and_struct_bodies() {
        let source = r#"
struct Point {
    int x;
    int y;
};

typedef int score_t;

static char *name_of(struct Point p) {
    return 0;
}

int main(void) {
    struct Point p;
    return 0;
}
"#;
        let occ = extract("point.c", source);
        assert!(has_def(&occ, "Point", Class));
        assert!(has_def(&occ, "score_t", Class));
        assert!(has_def(&occ, "name_of", Function));
        assert!(has_def(&occ, "main", Function));
        // `struct Point p;` has no body and is a use, not a definition
        assert_eq!(
            defs(&occ).iter().filter(|(n, _)| n == "Point").count(),
            1
        );
    }

    #[test]
    fn cpp_namespaces_and_members() {
        let source = r#"
namespace geo {
class Shape {
public:
    double area() { return 0.0; }
};
}

int Widget::size() { return 1; }
"#;
        let occ = extract("geo.cpp", source);
        assert!(has_def(&occ, "geo", Module));
        assert!(has_def(&occ, "Shape", Class));
        assert!(has_def(&occ, "area", Method));
        assert!(has_def(&occ, "size", Function));
    }

    #[test]
    fn ruby_classes_and_modules() {
        let source = r#"
module Greeting
  class Greeter
    def greet(name)
      "Hello, #{name}"
    end
  end
end
"#;
        let occ = extract("greeter.rb", source);
        assert!(has_def(&occ, "Greeting", Module));
        assert!(has_def(&occ, "Greeter", Class));
        assert!(has_def(&occ, "greet", Method));
    }

    #[test]
    fn php_classes_and_functions() {
        let source = r#"<?php
class UserService {
    public function find($id) { return null; }
}

function helper() {}
"#;
        let occ = extract("service.php", source);
        assert!(has_def(&occ, "UserService", Class));
        assert!(has_def(&occ, "find", Method));
        assert!(has_def(&occ, "helper", Function));
    }

    #[test]
    fn positions_are_one_indexed_lines() {
        let occ = extract("a.py", "\n\ndef f():\n    pass\n");
        let f = occ.iter().find(|o| o.name == "f").unwrap();
        assert_eq!(f.line_start, 3);
        assert_eq!(f.line_end, 4);
        assert_eq!(f.column, 4);
        assert_eq!(f.file, PathBuf::from("a.py"));
    }

    #[test]
    fn syntax_errors_give_partial_results() {
        let source = "fn valid_fn() -> bool { true }\n\nfn broken( {\n\nstruct ValidStruct { x: i32 }\n";
        let occ = extract("broken.rs", source);
        assert!(has_def(&occ, "valid_fn", Function));
    }

    #[test]
    fn empty_file_has_no_occurrences() {
        assert!(extract("empty.rs", "").is_empty());
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = TreeSitterExtractor::new()
            .extract(Path::new("notes.txt"), "hello")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedLanguage(_)));
    }

    #[test]
    fn deeply_nested_source_does_not_exhaust_the_stack() {
        let depth = 20_000;
        let source = format!(
            "x = {}1{}\n\ndef after():\n    return x\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let occ = std::thread::Builder::new()
            .stack_size(1024 * 1024)
            .spawn(move || extract("deep.py", &source))
            .unwrap()
            .join()
            .unwrap();
        assert!(has_def(&occ, "after", Function));
        assert!(has_ref(&occ, "x"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let source = "class A:\n    def m(self):\n        return helper()\n";
        assert_eq!(extract("a.py", source), extract("a.py", source));
    }
}
