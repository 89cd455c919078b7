use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Shared, growable list (APPEND/APPENDS mutate it in place).
pub type ListRef = Rc<RefCell<Vec<Value>>>;
/// Shared dict; keys are unique under structural equality.
pub type DictRef = Rc<RefCell<Dict>>;
/// Shared, immutable tuple.
pub type TupleRef = Rc<[Value]>;

/// Nesting bound for the recursive walks over a value graph (encoding and
/// JSON rendering).
pub const MAX_DEPTH: usize = 1000;

/// Width of a directly encoded small integer (BININT1/BININT2/BININT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    One,
    Two,
    Four,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::One => 1,
            IntWidth::Two => 2,
            IntWidth::Four => 4,
        }
    }
}

/// Which length encoding produced a text or bytes value. Only kept so a
/// value can be written back with the same opcode; it never affects
/// equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// 1-byte length prefix
    Short,
    /// 4-byte length prefix
    Long,
    /// 8-byte length prefix
    Wide,
    /// newline-terminated argument
    Line,
}

/// Decoded value graph node.
///
/// Containers are reference counted: the operand stack, the memo table
/// and parent containers can all hold the same instance. Cloning a
/// `Value` clones the handle, not the contents.
#[derive(Clone)]
pub enum Value {
    None,
    Int { width: IntWidth, value: u32 },
    Long { value: i64, overflowed: bool },
    Float(f64),
    Text { value: String, origin: Origin },
    Bytes { data: Vec<u8>, origin: Origin },
    /// Inert (module, qualified name) pair. Never resolved.
    Global { module: String, name: String },
    /// External blob returned by the resolver for `id`.
    PersistentRef { id: String, payload: Rc<[u8]> },
    List(ListRef),
    Tuple(TupleRef),
    Dict(DictRef),
    /// Stack-only sentinel delimiting a variable-length run.
    Mark,
}

impl Value {
    pub fn int(width: IntWidth, value: u32) -> Self {
        Value::Int { width, value }
    }

    pub fn bool(b: bool) -> Self {
        Value::Int {
            width: IntWidth::One,
            value: b as u32,
        }
    }

    pub fn long(value: i64) -> Self {
        Value::Long {
            value,
            overflowed: false,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text {
            value: s.into(),
            origin: Origin::Short,
        }
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes {
            data: data.into(),
            origin: Origin::Short,
        }
    }

    pub fn global(module: impl Into<String>, name: impl Into<String>) -> Self {
        Value::Global {
            module: module.into(),
            name: name.into(),
        }
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    /// Later pairs overwrite earlier ones with an equal key.
    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(pairs.into_iter().collect())))
    }

    /// Variant name, used in type-mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Int { .. } => "Int",
            Value::Long { .. } => "Long",
            Value::Float(_) => "Float",
            Value::Text { .. } => "Text",
            Value::Bytes { .. } => "Bytes",
            Value::Global { .. } => "GlobalRef",
            Value::PersistentRef { .. } => "PersistentRef",
            Value::List(_) => "List",
            Value::Tuple(_) => "Tuple",
            Value::Dict(_) => "Dict",
            Value::Mark => "Mark",
        }
    }

    #[inline]
    pub fn is_mark(&self) -> bool {
        matches!(self, Value::Mark)
    }

    /// Integer value of `Int` and non-overflowed `Long`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int { value, .. } => Some(*value as i64),
            Value::Long {
                value,
                overflowed: false,
            } => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes { data, .. } => Some(data),
            Value::PersistentRef { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&TupleRef> {
        match self {
            Value::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&DictRef> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Whether both handles point at the same container instance.
    /// Scalars are never identical in this sense.
    pub fn same_instance(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Look up `key` in a dict value.
    pub fn get(&self, key: &Value) -> Option<Value> {
        let dict = self.as_dict()?.borrow();
        dict.get(key).cloned()
    }

    /// Look up a text key in a dict value.
    pub fn get_str(&self, key: &str) -> Option<Value> {
        let dict = self.as_dict()?.borrow();
        dict.get_str(key).cloned()
    }
}

/// Insert or overwrite `key` in `dict`.
///
/// The position is located under a shared borrow that is released before
/// the mutable one, so keys that contain the dict itself do not panic.
pub fn dict_set(dict: &DictRef, key: Value, value: Value) {
    let at = dict.borrow().position(&key);
    dict.borrow_mut().insert_at(at, key, value);
}

/// Hashable form of integer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IntKey {
    Int(IntWidth, u32),
    Long(i64, bool),
}

impl IntKey {
    fn of(key: &Value) -> Option<Self> {
        match key {
            Value::Int { width, value } => Some(IntKey::Int(*width, *value)),
            Value::Long { value, overflowed } => Some(IntKey::Long(*value, *overflowed)),
            _ => None,
        }
    }
}

fn is_indexed(key: &Value) -> bool {
    matches!(key, Value::Text { .. } | Value::Int { .. } | Value::Long { .. })
}

/// Insertion-ordered key/value pairs.
///
/// Text and integer keys are found through hash indexes; any other key is
/// matched by scanning the non-indexed keys with structural equality.
#[derive(Clone, Default)]
pub struct Dict {
    pairs: Vec<(Value, Value)>,
    text: HashMap<String, usize>,
    ints: HashMap<IntKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Value, Value)> {
        self.pairs.iter()
    }

    pub fn pairs(&self) -> &[(Value, Value)] {
        &self.pairs
    }

    pub fn position(&self, key: &Value) -> Option<usize> {
        self.position_at_depth(key, 0)
    }

    fn position_at_depth(&self, key: &Value, depth: usize) -> Option<usize> {
        if let Value::Text { value, .. } = key {
            return self.text.get(value.as_str()).copied();
        }
        if let Some(k) = IntKey::of(key) {
            return self.ints.get(&k).copied();
        }
        self.pairs
            .iter()
            .position(|(k, _)| !is_indexed(k) && eq_at_depth(k, key, depth))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|i| &self.pairs[i].1)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.text.get(key).map(|&i| &self.pairs[i].1)
    }

    /// Insert or overwrite. An existing entry keeps its original key.
    pub fn insert(&mut self, key: Value, value: Value) {
        let at = self.position(&key);
        self.insert_at(at, key, value);
    }

    fn insert_at(&mut self, at: Option<usize>, key: Value, value: Value) {
        if let Some(i) = at {
            self.pairs[i].1 = value;
            return;
        }
        let i = self.pairs.len();
        if let Value::Text { value, .. } = &key {
            self.text.insert(value.clone(), i);
        } else if let Some(k) = IntKey::of(&key) {
            self.ints.insert(k, i);
        }
        self.pairs.push((key, value));
    }

    fn take_pairs(&mut self) -> Vec<(Value, Value)> {
        self.text.clear();
        self.ints.clear();
        std::mem::take(&mut self.pairs)
    }
}

impl FromIterator<(Value, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

impl Drop for Value {
    // Children of a container this handle solely owns are moved onto a
    // work list, so deeply nested graphs drop without deep recursion.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(mut child) = pending.pop() {
            child.take_children(&mut pending);
        }
    }
}

impl Value {
    fn take_children(&mut self, out: &mut Vec<Value>) {
        match self {
            Value::List(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    out.append(items.get_mut());
                }
            }
            Value::Dict(dict) => {
                if let Some(dict) = Rc::get_mut(dict) {
                    for (k, v) in dict.get_mut().take_pairs() {
                        out.push(k);
                        out.push(v);
                    }
                }
            }
            Value::Tuple(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    out.extend(items.iter_mut().map(|v| std::mem::replace(v, Value::None)));
                }
            }
            _ => {}
        }
    }

    /// Container allocation address; zero for scalars.
    fn address(&self) -> usize {
        match self {
            Value::List(l) => Rc::as_ptr(l) as *const () as usize,
            Value::Dict(d) => Rc::as_ptr(d) as *const () as usize,
            Value::Tuple(t) => Rc::as_ptr(t) as *const Value as usize,
            _ => 0,
        }
    }
}

impl PartialEq for Value {
    /// Structural equality. Origin tags are ignored and dicts compare
    /// without regard to insertion order. Cyclic graphs are equal when
    /// they unfold to the same infinite tree.
    fn eq(&self, other: &Self) -> bool {
        eq_at_depth(self, other, 0)
    }
}

/// `depth` counts nested key lookups: comparing two dicts whose keys are
/// themselves containers starts a fresh comparison per candidate key.
/// Past `MAX_KEY_NESTING` such keys are treated as distinct.
fn eq_at_depth(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_KEY_NESTING {
        return false;
    }
    let mut walk = EqWalk::default();
    walk.compare(a, b) && walk.run(depth)
}

const MAX_KEY_NESTING: usize = 64;

/// Work list of container pairs still to compare. A pair is expanded at
/// most once; meeting it again (through a cycle or a shared child) adds
/// nothing new, and any mismatch ends the walk.
#[derive(Default)]
struct EqWalk {
    pending: Vec<(Value, Value)>,
    seen: HashSet<(usize, usize)>,
}

impl EqWalk {
    /// Scalars are compared on the spot; container pairs are queued.
    fn compare(&mut self, a: &Value, b: &Value) -> bool {
        if a.same_instance(b) {
            return true;
        }
        match (a, b) {
            (Value::List(_), Value::List(_))
            | (Value::Tuple(_), Value::Tuple(_))
            | (Value::Dict(_), Value::Dict(_)) => {
                self.pending.push((a.clone(), b.clone()));
                true
            }
            _ => scalar_eq(a, b),
        }
    }

    fn run(&mut self, depth: usize) -> bool {
        while let Some((a, b)) = self.pending.pop() {
            if !self.seen.insert((a.address(), b.address())) {
                continue;
            }
            let equal = match (&a, &b) {
                (Value::List(x), Value::List(y)) => {
                    let (x, y) = (x.borrow(), y.borrow());
                    x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| self.compare(p, q))
                }
                (Value::Tuple(x), Value::Tuple(y)) => {
                    x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| self.compare(p, q))
                }
                (Value::Dict(x), Value::Dict(y)) => {
                    let (x, y) = (x.borrow(), y.borrow());
                    x.len() == y.len()
                        && x.iter().all(|(k, v)| match y.position_at_depth(k, depth + 1) {
                            Some(i) => self.compare(v, &y.pairs[i].1),
                            None => false,
                        })
                }
                _ => false,
            };
            if !equal {
                return false;
            }
        }
        true
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) | (Value::Mark, Value::Mark) => true,
        (Value::Int { width: wa, value: a }, Value::Int { width: wb, value: b }) => {
            wa == wb && a == b
        }
        (
            Value::Long {
                value: a,
                overflowed: oa,
            },
            Value::Long {
                value: b,
                overflowed: ob,
            },
        ) => a == b && oa == ob,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Text { value: a, .. }, Value::Text { value: b, .. }) => a == b,
        (Value::Bytes { data: a, .. }, Value::Bytes { data: b, .. }) => a == b,
        (
            Value::Global {
                module: ma,
                name: na,
            },
            Value::Global {
                module: mb,
                name: nb,
            },
        ) => ma == mb && na == nb,
        (
            Value::PersistentRef {
                id: ia,
                payload: pa,
            },
            Value::PersistentRef {
                id: ib,
                payload: pb,
            },
        ) => ia == ib && pa == pb,
        _ => false,
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int { width, value } => write!(f, "Int{}({value})", width.bytes()),
            Value::Long {
                value,
                overflowed: false,
            } => write!(f, "Long({value})"),
            Value::Long {
                value,
                overflowed: true,
            } => write!(f, "Long({value}, overflowed)"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Text { value, .. } => write!(f, "{value:?}"),
            Value::Bytes { data, .. } => write!(f, "b\"{}\"", data.escape_ascii()),
            Value::Global { module, name } => write!(f, "Global({module}.{name})"),
            Value::PersistentRef { id, payload } => {
                write!(f, "PersistentRef({id:?}, {} bytes)", payload.len())
            }
            // Containers print their contents one level deep only; graphs
            // built through the memo may be cyclic.
            Value::List(items) => match items.try_borrow() {
                Ok(items) => f
                    .debug_list()
                    .entries(items.iter().map(Shallow))
                    .finish(),
                Err(_) => write!(f, "[<borrowed>]"),
            },
            Value::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items.iter() {
                    t.field(&Shallow(item));
                }
                t.finish()
            }
            Value::Dict(pairs) => match pairs.try_borrow() {
                Ok(pairs) => f
                    .debug_map()
                    .entries(pairs.iter().map(|(k, v)| (Shallow(k), Shallow(v))))
                    .finish(),
                Err(_) => write!(f, "{{<borrowed>}}"),
            },
            Value::Mark => write!(f, "<MARK>"),
        }
    }
}

/// Debug adapter that abbreviates nested containers.
struct Shallow<'a>(&'a Value);

impl fmt::Debug for Shallow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::List(l) => write!(f, "[..{}]", l.borrow().len()),
            Value::Tuple(t) => write!(f, "(..{})", t.len()),
            Value::Dict(d) => write!(f, "{{..{}}}", d.borrow().len()),
            other => fmt::Debug::fmt(other, f),
        }
    }
}
