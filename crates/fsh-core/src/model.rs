//! The entity/rule data model (spec §3) and its path algebra.
//!
//! Everything here is produced by the importer (`crate::import`), enriched
//! by rule-set expansion (`crate::ruleset`), consumed read-only by exporters
//! (`crate::export`), and dropped after package assembly — nothing in this
//! module owns a reference back into the parse tree.

use crate::diagnostics::Location;

// ---------------------------------------------------------------------
// Path algebra
// ---------------------------------------------------------------------

/// One `name[bracket]` step of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub name: String,
    pub bracket: Option<Bracket>,
    /// Filled in by [`crate::soft_index`] for `[+]`/`[=]` steps; `None`
    /// until that second pass runs, and for steps that never had a soft
    /// bracket.
    pub resolved_index: Option<u32>,
}

impl PathStep {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bracket: None,
            resolved_index: None,
        }
    }

    /// The effective slice/index discriminator once soft indices have
    /// been resolved: a named slice stays a name, `[n]` stays `n`, and a
    /// resolved `[+]`/`[=]` reports its resolved integer.
    pub fn effective_index(&self) -> Option<u32> {
        match &self.bracket {
            Some(Bracket::Index(n)) => Some(*n),
            Some(Bracket::SoftNew) | Some(Bracket::SoftReuse) => self.resolved_index,
            _ => None,
        }
    }

    pub fn slice_name(&self) -> Option<&str> {
        match &self.bracket {
            Some(Bracket::Slice(name)) => Some(name),
            _ => None,
        }
    }
}

/// The bracket suffix on a path step, before soft indices are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bracket {
    Slice(String),
    Index(u32),
    /// `[+]` — allocate the next index at this parent prefix.
    SoftNew,
    /// `[=]` — reuse the most recently allocated index at this prefix.
    SoftReuse,
}

/// A non-empty dotted element path, e.g. `component.code.coding[0].system`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    pub steps: Vec<PathStep>,
}

impl Path {
    pub fn single(step: PathStep) -> Self {
        Self { steps: vec![step] }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Prefix used as the soft-index counter key: every step up to but not
    /// including the final one, joined with the final step's bare name.
    /// The counter key for a soft-index bracket at `steps[upto]`: every
    /// intervening step's name PLUS its already-resolved index or slice
    /// name, so two distinct branches of the same repeating element (e.g.
    /// `contact[0].telecom[+]` vs `contact[1].telecom[+]`) get distinct
    /// counters instead of colliding on the bare name `contact` (spec §3
    /// "per-(slice-path-prefix) counter"). Relies on steps `[0, upto)`
    /// having already been resolved by this same left-to-right pass.
    pub fn counter_prefix(&self, upto: usize) -> String {
        self.steps[..upto]
            .iter()
            .map(|s| match (s.effective_index(), s.slice_name()) {
                (Some(idx), _) => format!("{}[{idx}]", s.name),
                (None, Some(slice)) => format!("{}[{slice}]", s.name),
                (None, None) => s.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", step.name)?;
            match &step.bracket {
                Some(Bracket::Slice(name)) => write!(f, "[{name}]")?,
                Some(Bracket::Index(n)) => write!(f, "[{n}]")?,
                Some(Bracket::SoftNew) => write!(f, "[+]")?,
                Some(Bracket::SoftReuse) => write!(f, "[=]")?,
                None => {}
            }
        }
        Ok(())
    }
}

/// A caret path addresses metadata on the element definition itself
/// (`short`, `binding.strength`, `constraint[0].key`, ...) rather than
/// traversing the element tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaretPath {
    pub steps: Vec<PathStep>,
}

impl std::fmt::Display for CaretPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", step.name)?;
            if let Some(Bracket::Index(n)) = &step.bracket {
                write!(f, "[{n}]")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------

/// A numeric literal that remembers its source spelling, since the
/// target format distinguishes integer-valued decimals from true
/// integers by which rule matched at lex time, not by the scaled value.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub raw: String,
    pub is_decimal: bool,
    pub value: f64,
}

impl NumberLiteral {
    pub fn integer(value: i64) -> Self {
        Self {
            raw: value.to_string(),
            is_decimal: false,
            value: value as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantityValue {
    pub value: NumberLiteral,
    /// UCUM unit text from a `'unit'` literal; assumed bound to the UCUM
    /// system when present, matching how the shorthand spells quantities.
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatioComponent {
    pub value: NumberLiteral,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeValue {
    pub code: String,
    pub system: Option<String>,
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceValue {
    pub entity: String,
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalValue {
    pub entity: String,
    pub version: Option<String>,
}

/// A rule value, tagged by runtime kind; `AssignmentRule` picks a
/// `fixed[Type]`/`pattern[Type]` suffix from this at export time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Number(NumberLiteral),
    String(String),
    DateTime(String),
    Time(String),
    Code(CodeValue),
    Quantity(QuantityValue),
    Ratio {
        numerator: RatioComponent,
        denominator: RatioComponent,
    },
    Reference(ReferenceValue),
    Canonical(CanonicalValue),
    /// A resource-by-name value: an inline instance or a bare identifier
    /// resolved against the tank/definition store at export time.
    ResourceRef(String),
    /// A bare identifier that did not parse as any literal kind above and
    /// was not resolved as an alias; carried through so the exporter can
    /// attempt resolution against a value set, code system, or instance.
    Identifier(String),
}

impl Value {
    /// The target-format type suffix used for `fixed`/`pattern` field
    /// names and for disambiguating `[x]` polymorphic paths.
    pub fn type_suffix(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Number(n) if n.is_decimal => "Decimal",
            Value::Number(_) => "Integer",
            Value::String(_) => "String",
            Value::DateTime(_) => "DateTime",
            Value::Time(_) => "Time",
            Value::Code(_) => "CodeableConcept",
            Value::Quantity(_) => "Quantity",
            Value::Ratio { .. } => "Ratio",
            Value::Reference(_) => "Reference",
            Value::Canonical(_) => "Canonical",
            Value::ResourceRef(_) => "Reference",
            Value::Identifier(_) => "String",
        }
    }
}

// ---------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMax {
    Unbounded,
    Bounded(u32),
}

impl std::fmt::Display for CardMax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardMax::Unbounded => write!(f, "*"),
            CardMax::Bounded(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    pub must_support: Option<bool>,
    pub summary: Option<bool>,
    pub modifier: Option<bool>,
    pub trial_use: Option<bool>,
    pub normative: Option<bool>,
    pub draft: Option<bool>,
}

impl FlagSet {
    /// Later occurrences of the same flag letter on one rule line win, as
    /// there's no metadata-style first-wins rule for flags — they merge.
    pub fn merge(&mut self, other: &FlagSet) {
        macro_rules! merge_field {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        merge_field!(must_support);
        merge_field!(summary);
        merge_field!(modifier);
        merge_field!(trial_use);
        merge_field!(normative);
        merge_field!(draft);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStrength::Required => "required",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Example => "example",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnlyType {
    pub name: String,
    pub is_reference: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainsItem {
    pub name: String,
    pub type_name: Option<String>,
    pub min: Option<u32>,
    pub max: Option<CardMax>,
    pub flags: FlagSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConceptCode {
    pub code: String,
    pub system: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueSetFilter {
    pub property: String,
    pub op: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardRule {
    pub path: Path,
    pub min: Option<u32>,
    pub max: Option<CardMax>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagRule {
    pub path: Path,
    pub flags: FlagSet,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingRule {
    pub path: Path,
    pub value_set: String,
    pub strength: BindingStrength,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRule {
    pub path: Path,
    pub value: Value,
    pub exactly: bool,
    pub is_instance: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnlyRule {
    pub path: Path,
    pub types: Vec<OnlyType>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainsRule {
    pub path: Path,
    pub items: Vec<ContainsItem>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObeysRule {
    pub path: Path,
    pub invariant: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaretValueRule {
    pub path: Path,
    pub caret_path: CaretPath,
    pub value: Value,
    pub is_instance: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeCaretValueRule {
    pub code_path: Vec<ConceptCode>,
    pub caret_path: CaretPath,
    pub value: Value,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingRule {
    pub path: Path,
    pub target: String,
    pub comment: Option<String>,
    pub language: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRule {
    pub path: Option<Path>,
    pub ruleset_name: String,
    pub params: Vec<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddElementRule {
    pub path: Path,
    pub min: Option<u32>,
    pub max: Option<CardMax>,
    pub flags: FlagSet,
    pub types: Vec<OnlyType>,
    pub short: String,
    pub definition: Option<String>,
    pub content_reference: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConceptRule {
    /// Ordered code hierarchy, e.g. `[bear, sunbear, ursula]`.
    pub hierarchy: Vec<String>,
    pub display: Option<String>,
    pub definition: Option<String>,
    pub location: Location,
}

impl ConceptRule {
    pub fn code(&self) -> &str {
        self.hierarchy.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<&str> {
        if self.hierarchy.len() < 2 {
            None
        } else {
            Some(self.hierarchy[self.hierarchy.len() - 2].as_str())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueSetComponentRule {
    pub include: bool,
    pub concepts: Vec<ConceptCode>,
    pub from_system: Option<String>,
    pub from_value_sets: Vec<String>,
    pub filters: Vec<ValueSetFilter>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathRule {
    pub path: Path,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Path(PathRule),
    Card(CardRule),
    Flag(FlagRule),
    Binding(BindingRule),
    Assignment(AssignmentRule),
    Only(OnlyRule),
    Contains(ContainsRule),
    Obeys(ObeysRule),
    CaretValue(CaretValueRule),
    CodeCaretValue(CodeCaretValueRule),
    Mapping(MappingRule),
    Insert(InsertRule),
    AddElement(AddElementRule),
    Concept(ConceptRule),
    ValueSetComponent(ValueSetComponentRule),
}

impl Rule {
    pub fn location(&self) -> &Location {
        match self {
            Rule::Path(r) => &r.location,
            Rule::Card(r) => &r.location,
            Rule::Flag(r) => &r.location,
            Rule::Binding(r) => &r.location,
            Rule::Assignment(r) => &r.location,
            Rule::Only(r) => &r.location,
            Rule::Contains(r) => &r.location,
            Rule::Obeys(r) => &r.location,
            Rule::CaretValue(r) => &r.location,
            Rule::CodeCaretValue(r) => &r.location,
            Rule::Mapping(r) => &r.location,
            Rule::Insert(r) => &r.location,
            Rule::AddElement(r) => &r.location,
            Rule::Concept(r) => &r.location,
            Rule::ValueSetComponent(r) => &r.location,
        }
    }

    pub fn location_mut(&mut self) -> &mut Location {
        match self {
            Rule::Path(r) => &mut r.location,
            Rule::Card(r) => &mut r.location,
            Rule::Flag(r) => &mut r.location,
            Rule::Binding(r) => &mut r.location,
            Rule::Assignment(r) => &mut r.location,
            Rule::Only(r) => &mut r.location,
            Rule::Contains(r) => &mut r.location,
            Rule::Obeys(r) => &mut r.location,
            Rule::CaretValue(r) => &mut r.location,
            Rule::CodeCaretValue(r) => &mut r.location,
            Rule::Mapping(r) => &mut r.location,
            Rule::Insert(r) => &mut r.location,
            Rule::AddElement(r) => &mut r.location,
            Rule::Concept(r) => &mut r.location,
            Rule::ValueSetComponent(r) => &mut r.location,
        }
    }

    /// The element path this rule targets, for soft-index resolution and
    /// for rules that inherit a `PathRule` context. `None` for rules that
    /// are not path-addressed (concept rules, value-set components).
    pub fn path_mut(&mut self) -> Option<&mut Path> {
        match self {
            Rule::Path(r) => Some(&mut r.path),
            Rule::Card(r) => Some(&mut r.path),
            Rule::Flag(r) => Some(&mut r.path),
            Rule::Binding(r) => Some(&mut r.path),
            Rule::Assignment(r) => Some(&mut r.path),
            Rule::Only(r) => Some(&mut r.path),
            Rule::Contains(r) => Some(&mut r.path),
            Rule::Obeys(r) => Some(&mut r.path),
            Rule::CaretValue(r) => Some(&mut r.path),
            Rule::Mapping(r) => Some(&mut r.path),
            Rule::Insert(r) => r.path.as_mut(),
            Rule::AddElement(r) => Some(&mut r.path),
            Rule::CodeCaretValue(_) | Rule::Concept(_) | Rule::ValueSetComponent(_) => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Rule::Path(r) => Some(&r.path),
            Rule::Card(r) => Some(&r.path),
            Rule::Flag(r) => Some(&r.path),
            Rule::Binding(r) => Some(&r.path),
            Rule::Assignment(r) => Some(&r.path),
            Rule::Only(r) => Some(&r.path),
            Rule::Contains(r) => Some(&r.path),
            Rule::Obeys(r) => Some(&r.path),
            Rule::CaretValue(r) => Some(&r.path),
            Rule::Mapping(r) => Some(&r.path),
            Rule::Insert(r) => r.path.as_ref(),
            Rule::AddElement(r) => Some(&r.path),
            Rule::CodeCaretValue(_) | Rule::Concept(_) | Rule::ValueSetComponent(_) => None,
        }
    }
}

// ---------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Profile,
    Extension,
    Logical,
    Resource,
    Instance,
    ValueSet,
    CodeSystem,
    Invariant,
    Mapping,
    RuleSet,
    ParameterizedRuleSet,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "Profile",
            EntityKind::Extension => "Extension",
            EntityKind::Logical => "Logical",
            EntityKind::Resource => "Resource",
            EntityKind::Instance => "Instance",
            EntityKind::ValueSet => "ValueSet",
            EntityKind::CodeSystem => "CodeSystem",
            EntityKind::Invariant => "Invariant",
            EntityKind::Mapping => "Mapping",
            EntityKind::RuleSet => "RuleSet",
            EntityKind::ParameterizedRuleSet => "RuleSet",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityHeader {
    pub name: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Location,
}

impl EntityHeader {
    pub fn id_or_name(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceUsage {
    Example,
    Definition,
    Inline,
}

impl InstanceUsage {
    /// Target directory classification an `Instance:`'s artifact files
    /// under (spec §4.6 "emit `usage` metadata ... controlling target
    /// directory classification").
    pub fn dir_name(&self) -> &'static str {
        match self {
            InstanceUsage::Example => "examples",
            InstanceUsage::Definition => "instances",
            InstanceUsage::Inline => "inline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructureDefEntity {
    pub header: EntityHeader,
    pub parent: Option<String>,
    pub mixins: Vec<String>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub struct InstanceEntity {
    pub header: EntityHeader,
    pub instance_of: String,
    pub usage: InstanceUsage,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub struct TerminologyEntity {
    pub header: EntityHeader,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub struct InvariantEntity {
    pub header: EntityHeader,
    pub expression: Option<String>,
    pub xpath: Option<String>,
    pub severity: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct MappingEntity {
    pub header: EntityHeader,
    pub source: Option<String>,
    pub target: Option<String>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub struct RuleSetEntity {
    pub header: EntityHeader,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub struct ParameterizedRuleSetEntity {
    pub header: EntityHeader,
    pub params: Vec<String>,
    pub body_source: String,
    pub body_location: Location,
}

#[derive(Debug, Clone)]
pub enum Entity {
    Profile(StructureDefEntity),
    Extension(StructureDefEntity),
    Logical(StructureDefEntity),
    Resource(StructureDefEntity),
    Instance(InstanceEntity),
    ValueSet(TerminologyEntity),
    CodeSystem(TerminologyEntity),
    Invariant(InvariantEntity),
    Mapping(MappingEntity),
    RuleSet(RuleSetEntity),
    ParameterizedRuleSet(ParameterizedRuleSetEntity),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Profile(_) => EntityKind::Profile,
            Entity::Extension(_) => EntityKind::Extension,
            Entity::Logical(_) => EntityKind::Logical,
            Entity::Resource(_) => EntityKind::Resource,
            Entity::Instance(_) => EntityKind::Instance,
            Entity::ValueSet(_) => EntityKind::ValueSet,
            Entity::CodeSystem(_) => EntityKind::CodeSystem,
            Entity::Invariant(_) => EntityKind::Invariant,
            Entity::Mapping(_) => EntityKind::Mapping,
            Entity::RuleSet(_) => EntityKind::RuleSet,
            Entity::ParameterizedRuleSet(_) => EntityKind::ParameterizedRuleSet,
        }
    }

    pub fn header(&self) -> &EntityHeader {
        match self {
            Entity::Profile(e) | Entity::Extension(e) | Entity::Logical(e) | Entity::Resource(e) => {
                &e.header
            }
            Entity::Instance(e) => &e.header,
            Entity::ValueSet(e) | Entity::CodeSystem(e) => &e.header,
            Entity::Invariant(e) => &e.header,
            Entity::Mapping(e) => &e.header,
            Entity::RuleSet(e) => &e.header,
            Entity::ParameterizedRuleSet(e) => &e.header,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn location(&self) -> &Location {
        &self.header().location
    }

    pub fn rules(&self) -> &[Rule] {
        match self {
            Entity::Profile(e) | Entity::Extension(e) | Entity::Logical(e) | Entity::Resource(e) => {
                &e.rules
            }
            Entity::Instance(e) => &e.rules,
            Entity::ValueSet(e) | Entity::CodeSystem(e) => &e.rules,
            Entity::Mapping(e) => &e.rules,
            Entity::RuleSet(e) => &e.rules,
            Entity::Invariant(_) | Entity::ParameterizedRuleSet(_) => &[],
        }
    }

    pub fn rules_mut(&mut self) -> Option<&mut Vec<Rule>> {
        match self {
            Entity::Profile(e) | Entity::Extension(e) | Entity::Logical(e) | Entity::Resource(e) => {
                Some(&mut e.rules)
            }
            Entity::Instance(e) => Some(&mut e.rules),
            Entity::ValueSet(e) | Entity::CodeSystem(e) => Some(&mut e.rules),
            Entity::Mapping(e) => Some(&mut e.rules),
            Entity::RuleSet(e) => Some(&mut e.rules),
            Entity::Invariant(_) | Entity::ParameterizedRuleSet(_) => None,
        }
    }
}

// ---------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------

/// `Alias: $SCT = http://snomed.info/sct` — a per-document-group mapping
/// from a short identifier to a string, usually a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub target: String,
    pub location: Location,
}
