use crate::error::ValueError;
use crate::value::RpcValue;

/// Named call arguments in declared parameter order.
///
/// An absent optional argument is kept as `None` so handlers can tell it
/// apart from an explicit `null`. Absent arguments are omitted on the wire.
#[derive(Debug, Default, PartialEq)]
pub struct CallArgs {
    entries: Vec<(String, Option<RpcValue>)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a present argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<RpcValue>) -> Self {
        self.entries.push((name.into(), Some(value.into())));
        self
    }

    /// Append an optional argument, skipping it when `None`
    pub fn optional<V: Into<RpcValue>>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.entries.push((name.into(), Some(value.into())));
        }
        self
    }

    /// Append an argument slot, `None` marking an absent optional argument
    pub fn push(&mut self, name: impl Into<String>, value: Option<RpcValue>) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&RpcValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Move an argument out, leaving `None` in its slot
    pub fn take(&mut self, name: &str) -> Option<RpcValue> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.take())
    }

    pub fn take_required(&mut self, name: &str) -> Result<RpcValue, ValueError> {
        self.take(name)
            .ok_or_else(|| ValueError::MissingArgument(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&RpcValue>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }

    /// Present arguments in order, consuming the set
    pub fn into_present(self) -> impl Iterator<Item = (String, RpcValue)> {
        self.entries
            .into_iter()
            .filter_map(|(n, v)| v.map(|v| (n, v)))
    }
}
