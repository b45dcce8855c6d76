use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Mutex;

use windows::core::{BSTR, HSTRING, PCWSTR};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoInitializeSecurity, CoSetProxyBlanket,
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED, EOAC_NONE, RPC_C_AUTHN_LEVEL_DEFAULT,
    RPC_C_AUTHN_LEVEL_PKT_PRIVACY, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows::Win32::System::Rpc::{RPC_C_AUTHN_WINNT, RPC_C_AUTHZ_NONE};
use windows::Win32::System::Wmi::{
    IEnumWbemClassObject, IWbemClassObject, IWbemLocator, IWbemServices, WbemLocator,
    WBEM_FLAG_CONNECT_USE_MAX_WAIT, WBEM_FLAG_FORWARD_ONLY, WBEM_FLAG_RETURN_IMMEDIATELY,
    WBEM_INFINITE,
};

use crate::error::{Error, Result};

thread_local! {
    static COM_INITIALIZED: Cell<bool> = const { Cell::new(false) };
}

/// Virtualization namespace holding the Hyper-V management classes.
pub const VIRTUALIZATION_NAMESPACE: &str = r"root\virtualization\v2";

/// Namespace holding the host OS inventory classes.
pub const CIMV2_NAMESPACE: &str = r"root\cimv2";

/// Credentials for a remote management connection.
#[derive(Clone)]
pub struct Credentials {
    /// Domain (optional).
    pub domain: Option<String>,
    /// Username.
    pub username: String,
    /// Password. Never printed.
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Create new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            domain: None,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Create credentials with a domain.
    pub fn with_domain(
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: Some(domain.into()),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Full username (domain\user or just user).
    pub fn full_username(&self) -> String {
        if let Some(ref domain) = self.domain {
            format!("{}\\{}", domain, self.username)
        } else {
            self.username.clone()
        }
    }

    pub(crate) fn password_str(&self) -> &str {
        &self.password
    }
}

/// Target of a management session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Target machine name (None for the local host).
    pub machine_name: Option<String>,
    /// Credentials for remote connections; local connections use the
    /// ambient identity.
    pub credentials: Option<Credentials>,
}

impl SessionConfig {
    /// Target the local host.
    pub fn local() -> Self {
        Self::default()
    }

    /// Target a remote host.
    pub fn remote(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: Some(machine_name.into()),
            ..Default::default()
        }
    }

    /// Add credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn machine_label(&self) -> String {
        self.machine_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn namespace_path(&self, namespace: &str) -> String {
        if let Some(ref machine) = self.machine_name {
            format!("\\\\{}\\{}", machine, namespace)
        } else {
            namespace.to_string()
        }
    }
}

/// Connection to one management endpoint.
///
/// A session pins its endpoint identity for life; working against a
/// different host means constructing a new session, so a live flow can
/// never have its endpoint switched underneath it. Namespace scopes on
/// the endpoint are established lazily and cached.
pub struct WmiSession {
    config: SessionConfig,
    scopes: Mutex<HashMap<String, IWbemServices>>,
}

impl std::fmt::Debug for WmiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WmiSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WmiSession {
    /// Open a session against the local host.
    pub fn connect_local() -> Result<Self> {
        Self::with_config(SessionConfig::local())
    }

    /// Open a session against a remote host.
    pub fn connect_remote(machine_name: impl Into<String>, credentials: Credentials) -> Result<Self> {
        Self::with_config(SessionConfig::remote(machine_name).with_credentials(credentials))
    }

    /// Open a session with full configuration.
    ///
    /// The virtualization namespace is connected up front so an
    /// unreachable endpoint fails here instead of mid-flow.
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        let session = Self {
            config,
            scopes: Mutex::new(HashMap::new()),
        };
        session.connect(VIRTUALIZATION_NAMESPACE)?;
        Ok(session)
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Target machine name, as presented to operators.
    pub fn machine_label(&self) -> String {
        self.config.machine_label()
    }

    /// Check if the session targets a remote machine.
    pub fn is_remote(&self) -> bool {
        self.config.machine_name.is_some()
    }

    /// Establish (or re-establish) a namespace scope on the endpoint.
    pub fn connect(&self, namespace: &str) -> Result<()> {
        let services = self.open_scope(namespace)?;
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.insert(namespace.to_string(), services);
        Ok(())
    }

    fn scope(&self, namespace: &str) -> Result<IWbemServices> {
        {
            let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(services) = scopes.get(namespace) {
                return Ok(services.clone());
            }
        }
        let services = self.open_scope(namespace)?;
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(scopes
            .entry(namespace.to_string())
            .or_insert(services)
            .clone())
    }

    fn open_scope(&self, namespace: &str) -> Result<IWbemServices> {
        unsafe {
            init_com();

            let locator: IWbemLocator = CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER)
                .map_err(|e| Error::Connection {
                    machine: self.config.machine_label(),
                    message: e.to_string(),
                })?;

            let namespace_bstr = BSTR::from(self.config.namespace_path(namespace));

            let services = if let Some(ref creds) = self.config.credentials {
                let user_bstr = BSTR::from(creds.full_username());
                let pass_bstr = BSTR::from(creds.password_str());

                locator
                    .ConnectServer(
                        &namespace_bstr,
                        &user_bstr,
                        &pass_bstr,
                        &BSTR::new(),
                        WBEM_FLAG_CONNECT_USE_MAX_WAIT.0 as i32,
                        &BSTR::new(),
                        None,
                    )
                    .map_err(|e| {
                        let hresult = e.code().0 as u32;
                        // WBEM_E_ACCESS_DENIED / WBEM_E_INVALID_AUTHENTICATION
                        if hresult == 0x8004_1003 || hresult == 0x8004_1017 {
                            Error::AuthenticationRejected {
                                machine: self.config.machine_label(),
                                username: creds.full_username(),
                                message: e.to_string(),
                            }
                        } else {
                            Error::Connection {
                                machine: self.config.machine_label(),
                                message: e.to_string(),
                            }
                        }
                    })?
            } else {
                locator
                    .ConnectServer(
                        &namespace_bstr,
                        &BSTR::new(),
                        &BSTR::new(),
                        &BSTR::new(),
                        0,
                        &BSTR::new(),
                        None,
                    )
                    .map_err(|e| Error::Connection {
                        machine: self.config.machine_label(),
                        message: e.to_string(),
                    })?
            };

            // Packet privacy matches what the virtualization namespace
            // demands for remote method calls.
            CoSetProxyBlanket(
                &services,
                RPC_C_AUTHN_WINNT,
                RPC_C_AUTHZ_NONE,
                None,
                RPC_C_AUTHN_LEVEL_PKT_PRIVACY,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
            )
            .map_err(|e| Error::Connection {
                machine: self.config.machine_label(),
                message: e.to_string(),
            })?;

            tracing::debug!(machine = %self.config.machine_label(), namespace, "namespace scope established");
            Ok(services)
        }
    }

    /// Fetch records of a class, projected to the given fields.
    ///
    /// An empty field list selects every property. An empty result set
    /// is a valid outcome, not an error.
    pub fn query(
        &self,
        namespace: &str,
        class: &str,
        fields: &[&str],
    ) -> Result<Vec<IWbemClassObject>> {
        let projection = if fields.is_empty() {
            "*".to_string()
        } else {
            fields.join(", ")
        };
        let wql = format!("SELECT {} FROM {}", projection, class);

        let services = self.scope(namespace)?;
        unsafe {
            let query_lang = BSTR::from("WQL");
            let query_str = BSTR::from(&wql);

            let enumerator = services
                .ExecQuery(
                    &query_lang,
                    &query_str,
                    WBEM_FLAG_FORWARD_ONLY | WBEM_FLAG_RETURN_IMMEDIATELY,
                    None,
                )
                .map_err(|e| Error::Query {
                    query: wql.clone(),
                    source: e,
                })?;

            Ok(collect_results(enumerator))
        }
    }

    /// Fetch a single object by its path.
    pub fn get_object(&self, namespace: &str, path: &str) -> Result<IWbemClassObject> {
        let services = self.scope(namespace)?;
        unsafe {
            let path_bstr = BSTR::from(path);
            let mut obj = None;
            services
                .GetObject(&path_bstr, Default::default(), None, Some(&mut obj), None)
                .map_err(|e| Error::Query {
                    query: path.to_string(),
                    source: e,
                })?;
            obj.ok_or_else(|| Error::Query {
                query: path.to_string(),
                source: windows::core::Error::from_hresult(windows::core::HRESULT(-1)),
            })
        }
    }

    /// Fetch the single instance of a class, if one exists.
    pub fn singleton(&self, namespace: &str, class: &str) -> Result<Option<IWbemClassObject>> {
        Ok(self.query(namespace, class, &[])?.into_iter().next())
    }

    /// Spawn a blank instance of a class for building method payloads.
    pub fn spawn_instance(&self, namespace: &str, class: &str) -> Result<IWbemClassObject> {
        let definition = self.get_object(namespace, class)?;
        unsafe {
            definition.SpawnInstance(0).map_err(|e| Error::Method {
                class: class.to_string(),
                method: "SpawnInstance".to_string(),
                source: e,
            })
        }
    }

    /// Spawn the input-parameter object for a method.
    pub fn get_method_params(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
    ) -> Result<IWbemClassObject> {
        let definition = self.get_object(namespace, class)?;
        unsafe {
            let method_hstring = HSTRING::from(method);
            let mut in_params = None;
            let mut out_params = None;
            definition
                .GetMethod(
                    PCWSTR(method_hstring.as_ptr()),
                    0,
                    &mut in_params,
                    &mut out_params,
                )
                .map_err(|e| Error::Method {
                    class: class.to_string(),
                    method: method.to_string(),
                    source: e,
                })?;

            in_params
                .map(|p| p.SpawnInstance(0))
                .transpose()
                .map_err(|e| Error::Method {
                    class: class.to_string(),
                    method: method.to_string(),
                    source: e,
                })?
                .ok_or_else(|| Error::Method {
                    class: class.to_string(),
                    method: method.to_string(),
                    source: windows::core::Error::from_hresult(windows::core::HRESULT(-1)),
                })
        }
    }

    /// Invoke a method on an object and return its out-parameters.
    ///
    /// Side-effecting; callers must not assume idempotence. The numeric
    /// `ReturnValue` in the result is the caller's to classify.
    pub fn exec_method(
        &self,
        namespace: &str,
        object_path: &str,
        method: &str,
        in_params: Option<&IWbemClassObject>,
    ) -> Result<IWbemClassObject> {
        let services = self.scope(namespace)?;
        unsafe {
            let path_bstr = BSTR::from(object_path);
            let method_bstr = BSTR::from(method);

            let mut out_params = None;
            services
                .ExecMethod(
                    &path_bstr,
                    &method_bstr,
                    Default::default(),
                    None,
                    in_params,
                    Some(&mut out_params),
                    None,
                )
                .map_err(|e| Error::Method {
                    class: object_path.to_string(),
                    method: method.to_string(),
                    source: e,
                })?;

            out_params.ok_or_else(|| Error::Method {
                class: object_path.to_string(),
                method: method.to_string(),
                source: windows::core::Error::from_hresult(windows::core::HRESULT(-1)),
            })
        }
    }
}

fn init_com() {
    COM_INITIALIZED.with(|initialized| {
        if !initialized.get() {
            unsafe {
                let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
                let _ = CoInitializeSecurity(
                    None,
                    -1,
                    None,
                    None,
                    RPC_C_AUTHN_LEVEL_DEFAULT,
                    RPC_C_IMP_LEVEL_IMPERSONATE,
                    None,
                    EOAC_NONE,
                    None,
                );
            }
            initialized.set(true);
        }
    });
}

fn collect_results(enumerator: IEnumWbemClassObject) -> Vec<IWbemClassObject> {
    let mut results = Vec::new();
    loop {
        let mut objects: [Option<IWbemClassObject>; 1] = [None];
        let mut returned = 0u32;

        unsafe {
            let hr = enumerator.Next(WBEM_INFINITE, &mut objects, &mut returned);
            if hr.is_err() || returned == 0 {
                break;
            }
            if let Some(obj) = objects[0].take() {
                results.push(obj);
            }
        }
    }
    results
}

/// Property access over management records.
pub trait WbemClassObjectExt {
    /// Get a string property.
    fn get_string_prop(&self, name: &str) -> Result<Option<String>>;

    /// Get a u16 property.
    fn get_u16(&self, name: &str) -> Result<Option<u16>>;

    /// Get a u32 property.
    fn get_u32(&self, name: &str) -> Result<Option<u32>>;

    /// Get a u64 property.
    fn get_u64(&self, name: &str) -> Result<Option<u64>>;

    /// Get a bool property.
    fn get_bool(&self, name: &str) -> Result<Option<bool>>;

    /// Get a string array property.
    fn get_string_array(&self, name: &str) -> Result<Option<Vec<String>>>;

    /// Get the object path (`__PATH`).
    fn get_path(&self) -> Result<String>;

    /// Set a string property.
    fn put_string(&self, name: &str, value: &str) -> Result<()>;

    /// Set a u16 property.
    fn put_u16(&self, name: &str, value: u16) -> Result<()>;

    /// Set a u32 property.
    fn put_u32(&self, name: &str, value: u32) -> Result<()>;

    /// Set a u64 property.
    fn put_u64(&self, name: &str, value: u64) -> Result<()>;

    /// Set a bool property.
    fn put_bool(&self, name: &str, value: bool) -> Result<()>;

    /// Set a string array property.
    fn put_string_array(&self, name: &str, values: &[&str]) -> Result<()>;

    /// Set a u16 array property.
    fn put_u16_array(&self, name: &str, values: &[u16]) -> Result<()>;

    /// Set a bool array property.
    fn put_bool_array(&self, name: &str, values: &[bool]) -> Result<()>;

    /// Serialize the object as an embedded-instance string (DTD 2.0).
    fn get_text(&self) -> Result<String>;
}

impl WbemClassObjectExt for IWbemClassObject {
    fn get_string_prop(&self, name: &str) -> Result<Option<String>> {
        use windows::Win32::System::Variant::{VARIANT, VT_BSTR, VT_EMPTY, VT_NULL};

        unsafe {
            let name_hstring = HSTRING::from(name);
            let mut value = VARIANT::default();
            let hr = self.Get(PCWSTR(name_hstring.as_ptr()), 0, &mut value, None, None);
            if hr.is_err() {
                return Ok(None);
            }
            let vt = value.Anonymous.Anonymous.vt;
            if vt == VT_NULL || vt == VT_EMPTY {
                return Ok(None);
            }
            if vt == VT_BSTR {
                let bstr = &value.Anonymous.Anonymous.Anonymous.bstrVal;
                return Ok(Some(String::try_from(&**bstr).unwrap_or_default()));
            }
            Err(Error::PropertyType {
                property: "unknown",
                expected: "String",
            })
        }
    }

    fn get_u16(&self, name: &str) -> Result<Option<u16>> {
        use super::variant::FromVariant;
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let mut value = VARIANT::default();
            let hr = self.Get(PCWSTR(name_hstring.as_ptr()), 0, &mut value, None, None);
            if hr.is_err() {
                return Ok(None);
            }
            u16::from_variant(&value)
        }
    }

    fn get_u32(&self, name: &str) -> Result<Option<u32>> {
        use super::variant::FromVariant;
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let mut value = VARIANT::default();
            let hr = self.Get(PCWSTR(name_hstring.as_ptr()), 0, &mut value, None, None);
            if hr.is_err() {
                return Ok(None);
            }
            u32::from_variant(&value)
        }
    }

    fn get_u64(&self, name: &str) -> Result<Option<u64>> {
        use super::variant::FromVariant;
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let mut value = VARIANT::default();
            let hr = self.Get(PCWSTR(name_hstring.as_ptr()), 0, &mut value, None, None);
            if hr.is_err() {
                return Ok(None);
            }
            u64::from_variant(&value)
        }
    }

    fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        use super::variant::FromVariant;
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let mut value = VARIANT::default();
            let hr = self.Get(PCWSTR(name_hstring.as_ptr()), 0, &mut value, None, None);
            if hr.is_err() {
                return Ok(None);
            }
            bool::from_variant(&value)
        }
    }

    fn get_string_array(&self, name: &str) -> Result<Option<Vec<String>>> {
        use super::variant::FromVariant;
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let mut value = VARIANT::default();
            let hr = self.Get(PCWSTR(name_hstring.as_ptr()), 0, &mut value, None, None);
            if hr.is_err() {
                return Ok(None);
            }
            Vec::<String>::from_variant(&value)
        }
    }

    fn get_path(&self) -> Result<String> {
        self.get_string_prop("__PATH")?
            .ok_or(Error::MissingProperty("__PATH"))
    }

    fn put_string(&self, name: &str, value: &str) -> Result<()> {
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let variant = VARIANT::from(BSTR::from(value));
            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn put_u16(&self, name: &str, value: u16) -> Result<()> {
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            // WMI expects signed variants for uint16 properties.
            let variant = VARIANT::from(value as i16);
            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn put_u32(&self, name: &str, value: u32) -> Result<()> {
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let variant = VARIANT::from(value as i32);
            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn put_u64(&self, name: &str, value: u64) -> Result<()> {
        // WMI transports uint64 as a string.
        self.put_string(name, &value.to_string())
    }

    fn put_bool(&self, name: &str, value: bool) -> Result<()> {
        use windows::Win32::System::Variant::VARIANT;

        unsafe {
            let name_hstring = HSTRING::from(name);
            let variant = VARIANT::from(value);
            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn put_string_array(&self, name: &str, values: &[&str]) -> Result<()> {
        use windows::Win32::System::Com::SAFEARRAYBOUND;
        use windows::Win32::System::Ole::{SafeArrayCreate, SafeArrayDestroy, SafeArrayPutElement};
        use windows::Win32::System::Variant::{VARIANT, VT_ARRAY, VT_BSTR};

        unsafe {
            let name_hstring = HSTRING::from(name);

            let bounds = SAFEARRAYBOUND {
                cElements: values.len() as u32,
                lLbound: 0,
            };
            let sa = SafeArrayCreate(VT_BSTR, 1, &bounds);
            if sa.is_null() {
                return Err(Error::MissingProperty("SAFEARRAY"));
            }

            for (i, value) in values.iter().enumerate() {
                let bstr = BSTR::from(*value);
                let index = i as i32;
                if let Err(e) = SafeArrayPutElement(sa, &index, bstr.into_raw() as *const _) {
                    let _ = SafeArrayDestroy(sa);
                    return Err(Error::Method {
                        class: "SafeArray".to_string(),
                        method: "PutElement".to_string(),
                        source: e,
                    });
                }
            }

            let mut variant = VARIANT::default();
            (*variant.Anonymous.Anonymous).vt = VT_ARRAY | VT_BSTR;
            (*variant.Anonymous.Anonymous).Anonymous.parray = sa;

            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn put_u16_array(&self, name: &str, values: &[u16]) -> Result<()> {
        use windows::Win32::System::Com::SAFEARRAYBOUND;
        use windows::Win32::System::Ole::{SafeArrayCreate, SafeArrayDestroy, SafeArrayPutElement};
        use windows::Win32::System::Variant::{VARIANT, VT_ARRAY, VT_I2};

        unsafe {
            let name_hstring = HSTRING::from(name);

            let bounds = SAFEARRAYBOUND {
                cElements: values.len() as u32,
                lLbound: 0,
            };
            let sa = SafeArrayCreate(VT_I2, 1, &bounds);
            if sa.is_null() {
                return Err(Error::MissingProperty("SAFEARRAY"));
            }

            for (i, value) in values.iter().enumerate() {
                let element = *value as i16;
                let index = i as i32;
                if let Err(e) = SafeArrayPutElement(sa, &index, &element as *const i16 as *const _) {
                    let _ = SafeArrayDestroy(sa);
                    return Err(Error::Method {
                        class: "SafeArray".to_string(),
                        method: "PutElement".to_string(),
                        source: e,
                    });
                }
            }

            let mut variant = VARIANT::default();
            (*variant.Anonymous.Anonymous).vt = VT_ARRAY | VT_I2;
            (*variant.Anonymous.Anonymous).Anonymous.parray = sa;

            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn put_bool_array(&self, name: &str, values: &[bool]) -> Result<()> {
        use windows::Win32::System::Com::SAFEARRAYBOUND;
        use windows::Win32::System::Ole::{SafeArrayCreate, SafeArrayDestroy, SafeArrayPutElement};
        use windows::Win32::System::Variant::{VARIANT, VT_ARRAY, VT_BOOL};

        unsafe {
            let name_hstring = HSTRING::from(name);

            let bounds = SAFEARRAYBOUND {
                cElements: values.len() as u32,
                lLbound: 0,
            };
            let sa = SafeArrayCreate(VT_BOOL, 1, &bounds);
            if sa.is_null() {
                return Err(Error::MissingProperty("SAFEARRAY"));
            }

            for (i, value) in values.iter().enumerate() {
                // VARIANT_BOOL: -1 is true, 0 is false.
                let element: i16 = if *value { -1 } else { 0 };
                let index = i as i32;
                if let Err(e) = SafeArrayPutElement(sa, &index, &element as *const i16 as *const _) {
                    let _ = SafeArrayDestroy(sa);
                    return Err(Error::Method {
                        class: "SafeArray".to_string(),
                        method: "PutElement".to_string(),
                        source: e,
                    });
                }
            }

            let mut variant = VARIANT::default();
            (*variant.Anonymous.Anonymous).vt = VT_ARRAY | VT_BOOL;
            (*variant.Anonymous.Anonymous).Anonymous.parray = sa;

            self.Put(PCWSTR(name_hstring.as_ptr()), 0, &variant, 0)
                .map_err(|e| Error::Method {
                    class: "IWbemClassObject".to_string(),
                    method: "Put".to_string(),
                    source: e,
                })
        }
    }

    fn get_text(&self) -> Result<String> {
        use windows::Win32::System::Wmi::{
            IWbemObjectTextSrc, WbemObjectTextSrc, WMI_OBJ_TEXT_WMI_DTD_2_0,
        };

        unsafe {
            let text_src: IWbemObjectTextSrc =
                CoCreateInstance(&WbemObjectTextSrc, None, CLSCTX_INPROC_SERVER).map_err(|e| {
                    Error::Method {
                        class: "WbemObjectTextSrc".to_string(),
                        method: "CoCreateInstance".to_string(),
                        source: e,
                    }
                })?;

            // DTD 2.0 is what embedded instances in the virtualization
            // namespace must be encoded as.
            let text = text_src
                .GetText(0, self, WMI_OBJ_TEXT_WMI_DTD_2_0.0 as u32, None)
                .map_err(|e| Error::Method {
                    class: "IWbemObjectTextSrc".to_string(),
                    method: "GetText".to_string(),
                    source: e,
                })?;

            Ok(String::try_from(&text).unwrap_or_default())
        }
    }
}
