//! Field-level drift between desired parameters and the observation.

/// Fields whose desired value differs from what the provider reports.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drift {
    /// Fields with an update path.
    pub mutable: Vec<&'static str>,
    /// Fields that can only change by recreating the resource.
    pub immutable: Vec<&'static str>,
}

impl Drift {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mutable.is_empty() && self.immutable.is_empty()
    }

    pub fn has_mutable(&self, field: &str) -> bool {
        self.mutable.iter().any(|f| *f == field)
    }

    /// Compare a mutable field. An unset desired value never drifts.
    pub fn check_mutable<T: PartialEq + ?Sized>(
        &mut self,
        field: &'static str,
        desired: Option<&T>,
        observed: Option<&T>,
    ) {
        if differs(desired, observed) {
            self.mutable.push(field);
        }
    }

    /// Compare an immutable field. Unset on either side never drifts: the
    /// provider may simply not report it.
    pub fn check_immutable<T: PartialEq + ?Sized>(
        &mut self,
        field: &'static str,
        desired: Option<&T>,
        observed: Option<&T>,
    ) {
        if let (Some(d), Some(o)) = (desired, observed) {
            if d != o {
                self.immutable.push(field);
            }
        }
    }
}

fn differs<T: PartialEq + ?Sized>(desired: Option<&T>, observed: Option<&T>) -> bool {
    match desired {
        Some(d) => observed != Some(d),
        None => false,
    }
}

/// Compare two lists ignoring order.
pub fn same_set(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    b.sort();
    a == b
}

/// Compare two strings as JSON documents when both parse, else verbatim.
pub fn same_json(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(a),
        serde_json::from_str::<serde_json::Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
