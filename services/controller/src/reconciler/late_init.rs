//! Late initialization: adopt provider defaults into unset spec fields.
//!
//! A field is only ever filled while it is unset, so a value the user wrote
//! (or one adopted earlier) is never replaced.

/// Records which fields were filled during one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LateInit {
    filled: Vec<&'static str>,
}

impl LateInit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `spec` from `observed` if `spec` is unset.
    pub fn value<T: Clone>(&mut self, field: &'static str, spec: &mut Option<T>, observed: Option<&T>) {
        if spec.is_some() {
            return;
        }
        if let Some(v) = observed {
            *spec = Some(v.clone());
            self.filled.push(field);
        }
    }

    /// Like [`LateInit::value`], ignoring empty observed strings.
    pub fn string(&mut self, field: &'static str, spec: &mut Option<String>, observed: Option<&str>) {
        let observed = observed.filter(|s| !s.is_empty()).map(str::to_string);
        self.value(field, spec, observed.as_ref());
    }

    /// Like [`LateInit::value`], ignoring empty observed lists.
    pub fn list(&mut self, field: &'static str, spec: &mut Option<Vec<String>>, observed: &[String]) {
        if observed.is_empty() {
            return;
        }
        self.value(field, spec, Some(&observed.to_vec()));
    }

    pub fn changed(&self) -> bool {
        !self.filled.is_empty()
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_only_unset() {
        let mut li = LateInit::new();
        let mut hostname = None;
        let mut description = Some("mine".to_string());

        li.string("hostname", &mut hostname, Some("srv-001"));
        li.string("description", &mut description, Some("theirs"));

        assert_eq!(hostname.as_deref(), Some("srv-001"));
        assert_eq!(description.as_deref(), Some("mine"));
        assert_eq!(li.fields(), ["hostname"]);
    }

    #[test]
    fn test_second_pass_is_a_noop() {
        let mut locked = None;
        let mut first = LateInit::new();
        first.value("locked", &mut locked, Some(&false));
        assert!(first.changed());

        let mut second = LateInit::new();
        second.value("locked", &mut locked, Some(&true));
        assert!(!second.changed());
        assert_eq!(locked, Some(false));
    }

    #[test]
    fn test_empty_observations_are_ignored() {
        let mut li = LateInit::new();
        let mut tags = None;
        let mut url = None;
        li.list("tags", &mut tags, &[]);
        li.string("ipxeScriptUrl", &mut url, Some(""));

        assert!(!li.changed());
        assert!(tags.is_none());
        assert!(url.is_none());
    }
}
