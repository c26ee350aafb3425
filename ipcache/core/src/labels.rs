use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

/// Identifies where a label came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelSource {
    /// Derived from an IP prefix.
    Cidr,

    /// Reserved labels, e.g. `reserved:world`.
    Reserved,

    /// Supplied by operator configuration (per-IP metadata).
    Config,

    Generic,
}

/// A single label. Labels are keyed by `key`; the source tags the label's provenance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub key: String,
    pub value: String,
    pub source: LabelSource,
}

/// An ordered, cheaply-cloneable set of labels.
///
/// Iteration order is deterministic so that identical inputs always produce identical label sets,
/// which the identity allocator relies on to find existing identities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, Label>;

#[derive(Debug, thiserror::Error)]
#[error("invalid label: {0}")]
pub struct InvalidLabel(String);

pub const ID_NAME_WORLD: &str = "world";

// === impl LabelSource ===

impl LabelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cidr => "cidr",
            Self::Reserved => "reserved",
            Self::Config => "config",
            Self::Generic => "unspec",
        }
    }
}

impl fmt::Display for LabelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for LabelSource {
    type Err = InvalidLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cidr" => Ok(Self::Cidr),
            "reserved" => Ok(Self::Reserved),
            "config" => Ok(Self::Config),
            "unspec" => Ok(Self::Generic),
            s => Err(InvalidLabel(s.to_string())),
        }
    }
}

// === impl Label ===

impl Label {
    pub fn new(source: LabelSource, key: impl ToString, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            source,
        }
    }

    /// The label carried by every identity that represents traffic outside the cluster.
    pub fn world() -> Self {
        Self::new(LabelSource::Reserved, ID_NAME_WORLD, "")
    }

    #[inline]
    pub fn is_world(&self) -> bool {
        self.source == LabelSource::Reserved && self.key == ID_NAME_WORLD
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.key)?;
        if !self.value.is_empty() {
            write!(f, "={}", self.value)?;
        }
        Ok(())
    }
}

/// Parses `source:key[=value]`. A label without a known source prefix is generic.
impl FromStr for Label {
    type Err = InvalidLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, rest) = match s.split_once(':') {
            Some((src, rest)) => match src.parse() {
                Ok(source) => (source, rest),
                Err(_) => (LabelSource::Generic, s),
            },
            None => (LabelSource::Generic, s),
        };

        let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
        if key.is_empty() {
            return Err(InvalidLabel(s.to_string()));
        }

        Ok(Self::new(source, key, value))
    }
}

// === impl Labels ===

impl Labels {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Label> {
        self.0.get(key)
    }

    /// Returns true if an identical label (key, value and source) is present.
    pub fn has(&self, label: &Label) -> bool {
        self.0.get(&label.key) == Some(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.values()
    }

    pub fn insert(&mut self, label: Label) {
        Arc::make_mut(&mut self.0).insert(label.key.clone(), label);
    }

    /// Merges `other` into this set. Labels in `other` replace labels with the same key.
    pub fn merge(&mut self, other: &Labels) {
        if other.is_empty() {
            return;
        }
        let map = Arc::make_mut(&mut self.0);
        for label in other.iter() {
            map.insert(label.key.clone(), label.clone());
        }
    }

    /// Returns the labels with the given source.
    pub fn by_source(&self, source: LabelSource) -> impl Iterator<Item = &Label> {
        self.iter().filter(move |l| l.source == source)
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels = self.iter();
        if let Some(first) = labels.next() {
            first.fmt(f)?;
            for label in labels {
                write!(f, ",{}", label)?;
            }
        }
        Ok(())
    }
}

impl std::iter::FromIterator<Label> for Labels {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self(Arc::new(
            iter.into_iter().map(|l| (l.key.clone(), l)).collect(),
        ))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    /// Builds a set of config-sourced labels.
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| Label::new(LabelSource::Config, k, v))
            .collect()
    }
}
