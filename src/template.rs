// Copyright 2022 jmjoy
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Value-template evaluation for directives like `fastcgi_param` that mix
//! literal text with variables (`$document_root$fastcgi_script_name`).
//!
//! This module evaluates an already-compiled template; parsing the
//! directive-file mini-language into one is out of scope (spec.md §1).

use bytes::{Bytes, BytesMut};

/// One segment of a compiled value template.
#[derive(Debug, Clone)]
pub enum TemplateSegment {
    Literal(Bytes),
    Variable(VarHandle),
}

/// Opaque handle naming a variable a [`Vars`] implementation can resolve.
/// Deliberately just a `String` rather than an interned index: templates are
/// compiled once per config load, not per request, so interning would add
/// complexity with no measurable benefit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarHandle(pub String);

impl VarHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// A compiled value template: an ordinary list of segments, evaluated by
/// concatenating each segment's bytes in order.
#[derive(Debug, Clone, Default)]
pub struct ValueTemplate {
    segments: Vec<TemplateSegment>,
}

impl ValueTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(mut self, bytes: impl Into<Bytes>) -> Self {
        self.segments.push(TemplateSegment::Literal(bytes.into()));
        self
    }

    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.segments.push(TemplateSegment::Variable(VarHandle::new(name)));
        self
    }

    /// Resolves every variable segment through `vars` and concatenates the
    /// result. Unresolvable variables evaluate to an empty string, matching
    /// nginx's treatment of unset variables in `fastcgi_param` values.
    pub fn evaluate(&self, vars: &dyn Vars) -> Bytes {
        let mut out = BytesMut::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(bytes) => out.extend_from_slice(bytes),
                TemplateSegment::Variable(handle) => {
                    if let Some(value) = vars.get(handle) {
                        out.extend_from_slice(value);
                    }
                }
            }
        }
        out.freeze()
    }
}

/// A source of variable values a [`ValueTemplate`] can be evaluated against.
pub trait Vars {
    fn get(&self, handle: &VarHandle) -> Option<Bytes>;
}

/// `$fastcgi_script_name` resolution: `ngx_http_fastcgi_script_name_variable`
/// appends `index` to `uri` when the request URI ends in `/`, otherwise
/// returns `uri` verbatim.
pub fn script_name(uri: &str, index: &str) -> String {
    if uri.ends_with('/') {
        let mut s = String::with_capacity(uri.len() + index.len());
        s.push_str(uri);
        s.push_str(index);
        s
    } else {
        uri.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapVars(HashMap<String, Bytes>);

    impl Vars for MapVars {
        fn get(&self, handle: &VarHandle) -> Option<Bytes> {
            self.0.get(&handle.0).cloned()
        }
    }

    #[test]
    fn script_name_appends_index_only_for_directory_uri() {
        assert_eq!(script_name("/app/", "index.php"), "/app/index.php");
        assert_eq!(script_name("/app/index.php", "index.php"), "/app/index.php");
    }

    #[test]
    fn evaluate_concatenates_literals_and_variables() {
        let template = ValueTemplate::new()
            .literal("root=")
            .variable("document_root")
            .literal("/app");
        let mut vars = HashMap::new();
        vars.insert("document_root".to_string(), Bytes::from_static(b"/srv"));
        let vars = MapVars(vars);
        assert_eq!(template.evaluate(&vars), Bytes::from_static(b"root=/srv/app"));
    }

    #[test]
    fn unresolved_variable_evaluates_empty() {
        let template = ValueTemplate::new().variable("missing");
        let vars = MapVars(HashMap::new());
        assert_eq!(template.evaluate(&vars), Bytes::new());
    }
}
