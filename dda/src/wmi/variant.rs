//! VARIANT-to-Rust conversions for record properties.

use windows::core::BSTR;
use windows::Win32::System::Ole::{SafeArrayGetElement, SafeArrayGetLBound, SafeArrayGetUBound};
use windows::Win32::System::Variant::{
    VARIANT, VT_ARRAY, VT_BOOL, VT_BSTR, VT_EMPTY, VT_I2, VT_I4, VT_I8, VT_NULL, VT_UI2, VT_UI4,
    VT_UI8,
};

use crate::error::{Error, Result};

/// Conversion from a raw VARIANT, with null/empty mapping to `None`.
pub(crate) trait FromVariant: Sized {
    /// # Safety
    /// `value` must be a live VARIANT owned by the caller.
    unsafe fn from_variant(value: &VARIANT) -> Result<Option<Self>>;
}

impl FromVariant for u16 {
    unsafe fn from_variant(value: &VARIANT) -> Result<Option<Self>> {
        let vt = value.Anonymous.Anonymous.vt;
        if vt == VT_NULL || vt == VT_EMPTY {
            return Ok(None);
        }
        let inner = &value.Anonymous.Anonymous.Anonymous;
        match vt {
            VT_I2 => Ok(Some(inner.iVal as u16)),
            VT_UI2 => Ok(Some(inner.uiVal)),
            VT_I4 => Ok(Some(inner.lVal as u16)),
            VT_UI4 => Ok(Some(inner.ulVal as u16)),
            _ => Err(Error::PropertyType {
                property: "unknown",
                expected: "u16",
            }),
        }
    }
}

impl FromVariant for u32 {
    unsafe fn from_variant(value: &VARIANT) -> Result<Option<Self>> {
        let vt = value.Anonymous.Anonymous.vt;
        if vt == VT_NULL || vt == VT_EMPTY {
            return Ok(None);
        }
        let inner = &value.Anonymous.Anonymous.Anonymous;
        match vt {
            VT_I4 => Ok(Some(inner.lVal as u32)),
            VT_UI4 => Ok(Some(inner.ulVal)),
            VT_I2 => Ok(Some(inner.iVal as u32)),
            VT_UI2 => Ok(Some(inner.uiVal as u32)),
            _ => Err(Error::PropertyType {
                property: "unknown",
                expected: "u32",
            }),
        }
    }
}

impl FromVariant for u64 {
    unsafe fn from_variant(value: &VARIANT) -> Result<Option<Self>> {
        let vt = value.Anonymous.Anonymous.vt;
        if vt == VT_NULL || vt == VT_EMPTY {
            return Ok(None);
        }
        let inner = &value.Anonymous.Anonymous.Anonymous;
        match vt {
            // WMI transports uint64 properties as strings.
            VT_BSTR => {
                let s = String::try_from(&*inner.bstrVal).unwrap_or_default();
                s.parse::<u64>().map(Some).map_err(|_| Error::PropertyType {
                    property: "unknown",
                    expected: "u64",
                })
            }
            VT_I8 => Ok(Some(inner.llVal as u64)),
            VT_UI8 => Ok(Some(inner.ullVal)),
            VT_I4 => Ok(Some(inner.lVal as u64)),
            VT_UI4 => Ok(Some(inner.ulVal as u64)),
            _ => Err(Error::PropertyType {
                property: "unknown",
                expected: "u64",
            }),
        }
    }
}

impl FromVariant for bool {
    unsafe fn from_variant(value: &VARIANT) -> Result<Option<Self>> {
        let vt = value.Anonymous.Anonymous.vt;
        if vt == VT_NULL || vt == VT_EMPTY {
            return Ok(None);
        }
        let inner = &value.Anonymous.Anonymous.Anonymous;
        match vt {
            VT_BOOL => Ok(Some(inner.boolVal.as_bool())),
            _ => Err(Error::PropertyType {
                property: "unknown",
                expected: "bool",
            }),
        }
    }
}

impl FromVariant for Vec<String> {
    unsafe fn from_variant(value: &VARIANT) -> Result<Option<Self>> {
        let vt = value.Anonymous.Anonymous.vt;
        if vt == VT_NULL || vt == VT_EMPTY {
            return Ok(None);
        }
        if vt != VT_ARRAY | VT_BSTR {
            return Err(Error::PropertyType {
                property: "unknown",
                expected: "string array",
            });
        }

        let sa = value.Anonymous.Anonymous.Anonymous.parray;
        if sa.is_null() {
            return Ok(None);
        }

        let lower = SafeArrayGetLBound(sa, 1).map_err(|e| Error::Method {
            class: "SafeArray".to_string(),
            method: "GetLBound".to_string(),
            source: e,
        })?;
        let upper = SafeArrayGetUBound(sa, 1).map_err(|e| Error::Method {
            class: "SafeArray".to_string(),
            method: "GetUBound".to_string(),
            source: e,
        })?;

        let mut result = Vec::with_capacity((upper - lower + 1).max(0) as usize);
        for i in lower..=upper {
            let mut bstr = BSTR::default();
            SafeArrayGetElement(sa, &i, &mut bstr as *mut BSTR as *mut _).map_err(|e| {
                Error::Method {
                    class: "SafeArray".to_string(),
                    method: "GetElement".to_string(),
                    source: e,
                }
            })?;
            result.push(String::try_from(&bstr).unwrap_or_default());
        }
        Ok(Some(result))
    }
}
