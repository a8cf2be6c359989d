//! Connection targets and the transport selector.
//!
//! A [`ConnectionTarget`] describes where a backend server lives; the
//! selector deterministically maps it to a [`TransportSpec`]. Selection is
//! pure: no I/O, no environment inspection, no fallback guessing beyond
//! the documented rules.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tether_types::ClientError;

use crate::transport::{InProcessServer, TransportSpec};

/// Script extensions with a registered runtime launcher. Fixed at compile
/// time so selection never depends on the environment.
const SCRIPT_RUNTIMES: &[(&str, &str)] = &[("py", "python3"), ("js", "node")];

/// Where a backend server lives. Immutable once constructed.
#[derive(Clone)]
pub enum ConnectionTarget {
    /// A server reachable over HTTP(S). The URL decides the variant: a
    /// path containing an `sse` segment selects the SSE transport,
    /// anything else the streamable HTTP transport.
    NetworkEndpoint {
        url: String,
        headers: HashMap<String, String>,
    },
    /// An interpreted-language server script launched as a subprocess.
    ProcessScript {
        path: PathBuf,
        /// Launcher override; when `None` the runtime is picked from the
        /// script extension.
        runtime: Option<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// A tool distributed as a package (uvx/npx style). Never inferred;
    /// supply an explicit spec via [`TransportSpec::uvx`] or
    /// [`TransportSpec::npx`].
    PackagedTool {
        tool: String,
        package_source: String,
        extra_packages: Vec<String>,
    },
    /// A server hosted in this process.
    InProcess { server: Arc<dyn InProcessServer> },
    /// A named mapping of backends, composed by the aggregator.
    MultiServer(BTreeMap<String, ConnectionTarget>),
    /// A caller-supplied transport recipe, passed through untouched.
    Explicit(TransportSpec),
}

impl ConnectionTarget {
    /// A network endpoint with no custom headers.
    pub fn url(url: impl Into<String>) -> Self {
        Self::NetworkEndpoint {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// A script target with runtime inference from the extension.
    pub fn script(path: impl Into<PathBuf>) -> Self {
        Self::ProcessScript {
            path: path.into(),
            runtime: None,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkEndpoint { url, .. } => {
                f.debug_struct("NetworkEndpoint").field("url", url).finish_non_exhaustive()
            }
            Self::ProcessScript { path, runtime, .. } => f
                .debug_struct("ProcessScript")
                .field("path", path)
                .field("runtime", runtime)
                .finish_non_exhaustive(),
            Self::PackagedTool { tool, .. } => {
                f.debug_struct("PackagedTool").field("tool", tool).finish_non_exhaustive()
            }
            Self::InProcess { .. } => f.debug_struct("InProcess").finish_non_exhaustive(),
            Self::MultiServer(map) => f.debug_tuple("MultiServer").field(&map.keys()).finish(),
            Self::Explicit(spec) => f.debug_tuple("Explicit").field(spec).finish(),
        }
    }
}

impl TransportSpec {
    /// The transport selector: resolve `target` to the variant to
    /// instantiate.
    ///
    /// Rules, in priority order: network URLs split on an `sse` path
    /// segment; recognized script extensions bind their registered
    /// runtime; in-process references map directly; multi-server mappings
    /// belong to the aggregator; everything else requires an explicit
    /// spec and fails with a configuration error here.
    pub fn infer(target: &ConnectionTarget) -> Result<Self, ClientError> {
        match target {
            ConnectionTarget::NetworkEndpoint { url, headers } => {
                let scheme = url.split("://").next().unwrap_or_default();
                if scheme != "http" && scheme != "https" {
                    return Err(ClientError::Configuration(format!(
                        "unsupported URL scheme in '{url}'"
                    )));
                }
                if has_sse_segment(url) {
                    Ok(Self::Sse {
                        url: url.clone(),
                        headers: headers.clone(),
                    })
                } else {
                    Ok(Self::StreamableHttp {
                        url: url.clone(),
                        headers: headers.clone(),
                    })
                }
            }
            ConnectionTarget::ProcessScript {
                path,
                runtime,
                args,
                env,
            } => {
                let command = match runtime {
                    Some(runtime) => runtime.clone(),
                    None => runtime_for(path).ok_or_else(|| {
                        ClientError::Configuration(format!(
                            "no registered runtime for script '{}'",
                            path.display()
                        ))
                    })?,
                };
                let mut full_args = vec![path.to_string_lossy().into_owned()];
                full_args.extend(args.iter().cloned());
                Ok(Self::Stdio {
                    command,
                    args: full_args,
                    env: env.clone(),
                })
            }
            ConnectionTarget::InProcess { server } => Ok(Self::InProcess {
                server: Arc::clone(server),
            }),
            ConnectionTarget::MultiServer(_) => Err(ClientError::Configuration(
                "multi-server targets are composed by the aggregator, not a single transport"
                    .to_string(),
            )),
            ConnectionTarget::PackagedTool { tool, .. } => Err(ClientError::Configuration(format!(
                "packaged tool '{tool}' needs an explicit transport (TransportSpec::uvx/npx)"
            ))),
            ConnectionTarget::Explicit(spec) => Ok(spec.clone()),
        }
    }
}

/// True when the URL path contains an `sse` segment.
fn has_sse_segment(url: &str) -> bool {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let path = match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => return false,
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.split('/').any(|segment| segment == "sse")
}

fn runtime_for(path: &std::path::Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    SCRIPT_RUNTIMES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, runtime)| (*runtime).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;

    #[test]
    fn plain_http_url_selects_streamable_http() {
        let spec = TransportSpec::infer(&ConnectionTarget::url("https://example.com/mcp")).unwrap();
        assert_eq!(spec.kind(), TransportKind::StreamableHttp);
    }

    #[test]
    fn sse_path_segment_selects_sse() {
        let spec = TransportSpec::infer(&ConnectionTarget::url("https://example.com/sse/")).unwrap();
        assert_eq!(spec.kind(), TransportKind::Sse);

        let spec = TransportSpec::infer(&ConnectionTarget::url("http://localhost:8000/sse")).unwrap();
        assert_eq!(spec.kind(), TransportKind::Sse);
    }

    #[test]
    fn sse_in_query_does_not_count() {
        let spec =
            TransportSpec::infer(&ConnectionTarget::url("https://example.com/mcp?mode=sse")).unwrap();
        assert_eq!(spec.kind(), TransportKind::StreamableHttp);
    }

    #[test]
    fn sse_substring_of_segment_does_not_count() {
        let spec =
            TransportSpec::infer(&ConnectionTarget::url("https://example.com/assets/mcp")).unwrap();
        assert_eq!(spec.kind(), TransportKind::StreamableHttp);
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let err = TransportSpec::infer(&ConnectionTarget::url("ws://example.com/mcp")).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn python_script_binds_python_runtime() {
        let spec = TransportSpec::infer(&ConnectionTarget::script("servers/notes.py")).unwrap();
        match spec {
            TransportSpec::Stdio { command, args, .. } => {
                assert_eq!(command, "python3");
                assert_eq!(args, vec!["servers/notes.py".to_string()]);
            }
            other => panic!("Expected stdio spec, got {other:?}"),
        }
    }

    #[test]
    fn js_script_binds_node_runtime() {
        let spec = TransportSpec::infer(&ConnectionTarget::script("servers/notes.js")).unwrap();
        match spec {
            TransportSpec::Stdio { command, .. } => assert_eq!(command, "node"),
            other => panic!("Expected stdio spec, got {other:?}"),
        }
    }

    #[test]
    fn runtime_override_wins_over_extension() {
        let target = ConnectionTarget::ProcessScript {
            path: PathBuf::from("servers/notes.py"),
            runtime: Some("pypy".to_string()),
            args: vec!["--verbose".to_string()],
            env: HashMap::new(),
        };
        match TransportSpec::infer(&target).unwrap() {
            TransportSpec::Stdio { command, args, .. } => {
                assert_eq!(command, "pypy");
                assert_eq!(args, vec!["servers/notes.py".to_string(), "--verbose".to_string()]);
            }
            other => panic!("Expected stdio spec, got {other:?}"),
        }
    }

    #[test]
    fn unknown_script_extension_is_rejected() {
        let err = TransportSpec::infer(&ConnectionTarget::script("server.rb")).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn packaged_tool_is_never_inferred() {
        let target = ConnectionTarget::PackagedTool {
            tool: "server-time".to_string(),
            package_source: "mcp-server-time".to_string(),
            extra_packages: Vec::new(),
        };
        let err = TransportSpec::infer(&target).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn multi_server_is_deferred_to_the_aggregator() {
        let target = ConnectionTarget::MultiServer(BTreeMap::new());
        let err = TransportSpec::infer(&target).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn explicit_spec_passes_through() {
        let target = ConnectionTarget::Explicit(TransportSpec::uvx("mcp-server-time"));
        let spec = TransportSpec::infer(&target).unwrap();
        assert_eq!(spec.kind(), TransportKind::Stdio);
    }

    #[test]
    fn selection_is_deterministic() {
        let target = ConnectionTarget::url("https://example.com/api/sse/stream");
        for _ in 0..10 {
            assert_eq!(
                TransportSpec::infer(&target).unwrap().kind(),
                TransportKind::Sse
            );
        }
    }
}
