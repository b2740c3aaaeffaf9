use crate::watch::RequestOptions;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;

/// Modifiers for [`ResourceMeta::uri`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriOptions {
    pub watch: bool,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub status: bool,
    pub scale: bool,
}

impl UriOptions {
    #[must_use]
    pub fn watch() -> Self {
        Self {
            watch: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Describes one API resource: where it lives, what it is, and which verbs it
/// supports. Cheap to clone; every dispatched controller gets its own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMeta {
    path: String,
    resource: APIResource,
    api_config: RequestOptions,
}

impl ResourceMeta {
    /// `path` is the group-version prefix, e.g. `/api/v1` or `/apis/apps/v1`
    #[must_use]
    pub fn new(path: impl Into<String>, resource: APIResource, api_config: RequestOptions) -> Self {
        Self {
            path: path.into(),
            resource,
            api_config,
        }
    }

    /// `{path}[/watch][/namespaces/{ns}]/{name}[/{object}][/status|/scale]`
    ///
    /// The namespace segment is only emitted for namespaced resources.
    #[must_use]
    pub fn uri(&self, options: &UriOptions) -> String {
        let mut result = self.path.clone();
        if options.watch {
            result.push_str("/watch");
        }
        if let Some(namespace) = options.namespace.as_deref().filter(|_| self.namespaced()) {
            result.push_str("/namespaces/");
            result.push_str(namespace);
        }
        result.push('/');
        result.push_str(&self.resource.name);
        if let Some(name) = &options.name {
            result.push('/');
            result.push_str(name);
        }
        if options.status {
            result.push_str("/status");
        } else if options.scale {
            result.push_str("/scale");
        }
        result
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn resource(&self) -> &APIResource {
        &self.resource
    }

    /// Request options every call against this resource starts from
    #[must_use]
    pub const fn api_config(&self) -> &RequestOptions {
        &self.api_config
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.resource.name
    }

    #[must_use]
    pub fn singular_name(&self) -> &str {
        &self.resource.singular_name
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    #[must_use]
    pub const fn namespaced(&self) -> bool {
        self.resource.namespaced
    }

    #[must_use]
    pub fn verbs(&self) -> &[String] {
        &self.resource.verbs
    }

    #[must_use]
    pub fn has_verb(&self, verb: &str) -> bool {
        self.resource.verbs.iter().any(|v| v == verb)
    }
}
