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

//! Typed configuration surface, realizing spec.md §6.4's recognized options
//! as Rust fields with nginx's `ngx_http_fastcgi_merge_loc_conf` defaults.
//!
//! This module supplies the typed surface and its validation rules, not a
//! directive-file reader: parsing a config file, merging directives across
//! nested blocks, and expanding `$variable` templates into a compiled
//! [`crate::template::ValueTemplate`] stay out of scope (spec.md §1).

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{ConfigError, ConfigResult};
use crate::params::Params;
use crate::template::{ValueTemplate, Vars};

/// Where the upstream Responder listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamAddr {
    Inet { host: String, port: u16 },
    Unix(PathBuf),
}

/// `fastcgi_pass_request_method get` is the only override nginx recognizes;
/// anything else leaves the incoming request method untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMethodOverride {
    #[default]
    None,
    Get,
}

impl RequestMethodOverride {
    /// Coerces `method` per the configured override. `None` passes `method`
    /// through unchanged; `Get` always reports `GET`, matching
    /// `ngx_http_upstream_setup_request`'s `method = NGX_HTTP_GET` rewrite.
    /// Applied in [`FastcgiConfig::build_params`] to the `REQUEST_METHOD`
    /// directive's evaluated value, since nginx's own `fastcgi_params`
    /// resolves `REQUEST_METHOD` from `$request_method` like any other
    /// `fastcgi_param`.
    pub fn apply<'a>(&self, method: &'a str) -> &'a str {
        match self {
            Self::None => method,
            Self::Get => "GET",
        }
    }
}

/// `fastcgi_next_upstream` conditions. Each is an independent flag, not a
/// bitmask integer, since nginx's own representation is a set of named bits
/// checked independently and a struct of `bool`s reads the same way without
/// needing a `bitflags` dependency this crate has no other use for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NextUpstreamMask {
    pub error: bool,
    pub timeout: bool,
    pub invalid_header: bool,
    pub http_500: bool,
    pub http_404: bool,
}

impl NextUpstreamMask {
    pub fn any(self) -> bool {
        self.error || self.timeout || self.invalid_header || self.http_500 || self.http_404
    }

    /// spec.md §7: "Protocol errors from the downstream collaborator (header
    /// parser) are translated into `UpstreamInvalidHeader` and surfaced to
    /// the outer request pipeline, which may (depending on the configured
    /// next-upstream mask) retry against another peer." Classifies whether
    /// `err` is one of those retry-eligible failures; retrying and peer
    /// selection themselves are the outer pipeline's job (spec.md §1).
    pub fn should_retry(&self, err: &crate::error::FastcgiError) -> bool {
        use crate::error::{FastcgiError, ProtocolErrorKind};
        match err {
            FastcgiError::Protocol(p) => {
                self.invalid_header
                    && matches!(
                        p.kind,
                        ProtocolErrorKind::HeaderSplitAcrossRecords
                            | ProtocolErrorKind::HeaderLineParseError
                            | ProtocolErrorKind::PrematureStdoutClose
                    )
            }
            FastcgiError::Io(_) => self.error,
            _ => false,
        }
    }

    /// Whether a completed upstream response's status alone (no transport or
    /// protocol error) should trigger a retry against another peer, per
    /// `fastcgi_next_upstream http_500`/`http_404`.
    pub fn should_retry_for_status(&self, status: u16) -> bool {
        (self.http_500 && (500..600).contains(&status)) || (self.http_404 && status == 404)
    }
}

/// `fastcgi_buffers <count> <size>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPool {
    pub count: usize,
    pub size: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self { count: 8, size: 4096 }
    }
}

/// One `fastcgi_param` directive: a CGI variable name paired with its
/// (already-compiled) value template.
#[derive(Debug, Clone)]
pub struct ParamDirective {
    pub name: String,
    pub template: ValueTemplate,
}

/// Typed realization of spec.md §6.4's configuration surface, with nginx's
/// `ngx_http_fastcgi_merge_loc_conf` defaults.
#[derive(Debug, Clone)]
pub struct FastcgiConfig {
    pub upstream: UpstreamAddr,
    /// `fastcgi_index`: file name appended to a directory-ending URI when
    /// resolving `$fastcgi_script_name` (spec.md §6.5).
    pub index: String,
    pub params: Vec<ParamDirective>,
    /// Gates the HTTP header pass-through in [`FastcgiConfig::build_params`]:
    /// when `false`, no `HTTP_*` pairs are appended at all.
    pub pass_request_headers: bool,
    pub pass_request_body: bool,
    /// `fastcgi_x_powered_by`: whether the upstream's own `X-Powered-By`
    /// response header is forwarded to the client. This is a response-path
    /// concern of the surrounding HTTP server (spec.md §1's out-of-scope
    /// "surrounding HTTP server's request/response types"), not the
    /// Parameter Emitter; this crate carries the flag, the caller applies it
    /// when copying [`crate::header::ParsedHeaders`] onto its own outbound
    /// response.
    pub pass_x_powered_by: bool,
    /// `fastcgi_redirect_errors`: whether an upstream response status should
    /// be intercepted and handed to the surrounding HTTP server's own
    /// `error_page` handling instead of passed through verbatim. Also a
    /// response-path / outer-HTTP-server concern (spec.md §1); advisory
    /// metadata here, same as `pass_x_powered_by`. Per spec.md §9's Open
    /// Question: the original types this as `msec` but validates and uses it
    /// as a boolean; modeled as `bool` here. See DESIGN.md for the
    /// discrepancy note.
    pub redirect_errors: bool,
    /// Enforced by the external pipelined upstream I/O engine (spec.md §1),
    /// not this crate: the core never blocks or drives its own timers
    /// (spec.md §5).
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub read_timeout: Duration,
    /// `fastcgi_send_lowat`: platform-dependent, 0 disables. Validity beyond
    /// "fits in the wire type" is the I/O engine's concern, not this crate's.
    pub send_lowat: u32,
    /// Buffer sizing/pooling fields below are the external I/O engine's
    /// allocator policy (spec.md §1, §5's "shared-resource policy"); this
    /// crate only type-checks them via [`FastcgiConfig::validate`].
    pub header_buffer_size: usize,
    pub buffers: BufferPool,
    pub busy_buffers_size: usize,
    pub temp_file_write_size: usize,
    pub max_temp_file_size: usize,
    /// Applied to the `REQUEST_METHOD` directive's evaluated value inside
    /// [`FastcgiConfig::build_params`] via [`RequestMethodOverride::apply`].
    pub request_method_override: RequestMethodOverride,
    /// Consulted through [`NextUpstreamMask::should_retry`] /
    /// [`NextUpstreamMask::should_retry_for_status`] by the outer request
    /// pipeline (spec.md §7's propagation policy); peer selection itself
    /// stays out of scope (spec.md §1).
    pub next_upstream: NextUpstreamMask,
    /// Temp-file spooling destination; spooling itself is out of scope
    /// (spec.md §1).
    pub temp_dir: PathBuf,
}

impl FastcgiConfig {
    /// Starts from nginx's merge-time defaults for every option except
    /// `upstream`, which has no sensible default (`fastcgi_pass` is
    /// required).
    pub fn new(upstream: UpstreamAddr) -> Self {
        let header_buffer_size = 4096;
        let buffers = BufferPool::default();
        Self {
            upstream,
            index: "index.php".to_owned(),
            params: Vec::new(),
            pass_request_headers: true,
            pass_request_body: true,
            pass_x_powered_by: false,
            redirect_errors: false,
            connect_timeout: Duration::from_millis(60_000),
            send_timeout: Duration::from_millis(60_000),
            read_timeout: Duration::from_millis(60_000),
            send_lowat: 0,
            header_buffer_size,
            buffers,
            busy_buffers_size: 2 * header_buffer_size.max(buffers.size),
            temp_file_write_size: 8192,
            max_temp_file_size: 1024 * 1024 * 1024,
            request_method_override: RequestMethodOverride::default(),
            next_upstream: NextUpstreamMask::default(),
            temp_dir: PathBuf::from("/tmp"),
        }
    }

    /// Reproduces `ngx_http_fastcgi_merge_loc_conf`'s validation, performed
    /// once at startup (spec.md §7, `ConfigError` is raised only at startup).
    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffers.count < 2 {
            return Err(ConfigError::TooFewBuffers);
        }

        let chunk_floor = self.header_buffer_size.max(self.buffers.size);
        if self.busy_buffers_size < chunk_floor {
            return Err(ConfigError::BusyBuffersSizeTooSmall);
        }

        let ceiling = (self.buffers.count - 1) * self.buffers.size;
        if self.busy_buffers_size > ceiling {
            return Err(ConfigError::BusyBuffersSizeTooLarge);
        }

        if self.max_temp_file_size != 0 && self.max_temp_file_size < chunk_floor {
            return Err(ConfigError::MaxTempFileSizeTooSmall);
        }

        Ok(())
    }

    /// The Parameter Emitter's configuration-driven entry point (spec.md
    /// §4.2): evaluates every configured `fastcgi_param` directive's
    /// template against `vars`, coerces `REQUEST_METHOD` per
    /// `request_method_override`, and — when `pass_request_headers` is set —
    /// appends `request_headers` afterward via `HTTP_` rewriting
    /// ([`Params::push_http_header`]). A directive whose evaluated value is
    /// empty never reaches the output ([`Params::push`]'s skip-if-empty
    /// rule), so this is the one place spec.md §4.2's "If `value_len == 0`,
    /// skip the pair" invariant is exercised against live configuration
    /// rather than just unit-tested in isolation.
    pub fn build_params(&self, vars: &dyn Vars, request_headers: &[(String, Bytes)]) -> Params {
        let mut params = Params::new();

        for directive in &self.params {
            let mut value = directive.template.evaluate(vars);
            if directive.name == "REQUEST_METHOD" {
                let method = String::from_utf8_lossy(&value).into_owned();
                let coerced = self.request_method_override.apply(&method);
                value = Bytes::copy_from_slice(coerced.as_bytes());
            }
            params.push(directive.name.clone(), value);
        }

        if self.pass_request_headers {
            for (name, value) in request_headers {
                params.push_http_header(name, value.clone());
            }
        }

        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> UpstreamAddr {
        UpstreamAddr::Inet { host: "127.0.0.1".to_owned(), port: 9000 }
    }

    #[test]
    fn defaults_pass_validation() {
        FastcgiConfig::new(upstream()).validate().unwrap();
    }

    #[test]
    fn too_few_buffers_is_rejected() {
        let mut config = FastcgiConfig::new(upstream());
        config.buffers.count = 1;
        assert_eq!(config.validate().unwrap_err(), ConfigError::TooFewBuffers);
    }

    #[test]
    fn busy_buffers_size_below_floor_is_rejected() {
        let mut config = FastcgiConfig::new(upstream());
        config.busy_buffers_size = 1;
        assert_eq!(config.validate().unwrap_err(), ConfigError::BusyBuffersSizeTooSmall);
    }

    #[test]
    fn busy_buffers_size_above_ceiling_is_rejected() {
        let mut config = FastcgiConfig::new(upstream());
        config.busy_buffers_size = config.buffers.count * config.buffers.size;
        assert_eq!(config.validate().unwrap_err(), ConfigError::BusyBuffersSizeTooLarge);
    }

    #[test]
    fn zero_disables_temp_file_spooling() {
        let mut config = FastcgiConfig::new(upstream());
        config.max_temp_file_size = 0;
        config.validate().unwrap();
    }

    #[test]
    fn undersized_max_temp_file_size_is_rejected() {
        let mut config = FastcgiConfig::new(upstream());
        config.max_temp_file_size = 1;
        assert_eq!(config.validate().unwrap_err(), ConfigError::MaxTempFileSizeTooSmall);
    }

    struct NoVars;

    impl Vars for NoVars {
        fn get(&self, _handle: &crate::template::VarHandle) -> Option<Bytes> {
            None
        }
    }

    #[test]
    fn build_params_skips_directives_that_evaluate_empty() {
        let mut config = FastcgiConfig::new(upstream());
        config.params.push(ParamDirective {
            name: "QUERY_STRING".to_owned(),
            template: ValueTemplate::new().variable("query_string"),
        });
        config.params.push(ParamDirective {
            name: "SCRIPT_NAME".to_owned(),
            template: ValueTemplate::new().literal("/index.php"),
        });

        let params = config.build_params(&NoVars, &[]);
        assert_eq!(params.iter().count(), 1);
        assert_eq!(params.iter().next().unwrap().name(), b"SCRIPT_NAME");
    }

    #[test]
    fn pass_request_headers_false_drops_header_pass_through() {
        let mut config = FastcgiConfig::new(upstream());
        config.pass_request_headers = false;

        let headers = vec![("Host".to_owned(), Bytes::from_static(b"example.com"))];
        let params = config.build_params(&NoVars, &headers);
        assert!(params.is_empty());
    }

    #[test]
    fn pass_request_headers_true_appends_rewritten_headers() {
        let config = FastcgiConfig::new(upstream());
        assert!(config.pass_request_headers);

        let headers = vec![("Host".to_owned(), Bytes::from_static(b"example.com"))];
        let params = config.build_params(&NoVars, &headers);
        assert_eq!(params.iter().count(), 1);
        assert_eq!(params.iter().next().unwrap().name(), b"HTTP_HOST");
    }

    #[test]
    fn request_method_override_coerces_configured_request_method_directive() {
        let mut config = FastcgiConfig::new(upstream());
        config.request_method_override = RequestMethodOverride::Get;
        config.params.push(ParamDirective {
            name: "REQUEST_METHOD".to_owned(),
            template: ValueTemplate::new().literal("POST"),
        });

        let params = config.build_params(&NoVars, &[]);
        let pair = params.iter().next().unwrap();
        assert_eq!(pair.name(), b"REQUEST_METHOD");
        assert_eq!(pair.value(), b"GET");
    }
}
