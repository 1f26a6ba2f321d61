//! Human-readable ID allocation.

use crate::config::Config;
use crate::error::CoreResult;
use crate::kv::{KvEngine, KvTxn};
use crate::schema::{encode_u64, next_id_key, read_counter, META};
use crate::types::ObjectClass;
use parking_lot::Mutex;

/// Expands a printf-like template such as `"I%04d"` with `number`.
///
/// Supports `%d` and `%0Nd`. A template without a conversion gets the
/// number appended.
#[must_use]
pub fn format_id(template: &str, number: u64) -> String {
    let Some(start) = template.find('%') else {
        return format!("{template}{number}");
    };
    let spec = &template[start + 1..];
    let Some(end) = spec.find('d') else {
        return format!("{template}{number}");
    };
    let flags = &spec[..end];
    let (zero_pad, width) = match flags.strip_prefix('0') {
        Some(width) => (true, width),
        None => (false, flags),
    };
    let Ok(width) = (if width.is_empty() { Ok(0) } else { width.parse::<usize>() }) else {
        return format!("{template}{number}");
    };

    let digits = if zero_pad {
        format!("{number:0width$}")
    } else {
        format!("{number:width$}")
    };
    format!("{}{}{}", &template[..start], digits, &spec[end + 1..])
}

/// Per-class next-ID counters.
///
/// Counters advance in memory as soon as an ID is handed out, so two
/// objects added in one open transaction never get the same ID. The
/// advanced values are persisted with the next commit.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    templates: [String; 9],
    counters: Mutex<[u64; 9]>,
}

impl IdAllocator {
    /// Loads the counters from `meta`.
    pub(crate) fn load(engine: &KvEngine, config: &Config) -> CoreResult<Self> {
        let mut counters = [0u64; 9];
        for class in ObjectClass::ALL {
            counters[class.index()] = read_counter(engine, &next_id_key(class))?.unwrap_or(0);
        }
        Ok(Self {
            templates: config.id_prefixes.clone(),
            counters: Mutex::new(counters),
        })
    }

    /// Returns the first unused ID at or after the class counter.
    pub(crate) fn next_id(
        &self,
        class: ObjectClass,
        mut exists: impl FnMut(&str) -> CoreResult<bool>,
    ) -> CoreResult<String> {
        let mut counters = self.counters.lock();
        let template = &self.templates[class.index()];
        let mut number = counters[class.index()];
        loop {
            let id = format_id(template, number);
            number += 1;
            if !exists(&id)? {
                counters[class.index()] = number;
                return Ok(id);
            }
        }
    }

    /// Writes the current counters into `meta`.
    pub(crate) fn persist(&self, kv: &mut KvTxn<'_>) -> CoreResult<()> {
        let counters = *self.counters.lock();
        for class in ObjectClass::ALL {
            let key = next_id_key(class);
            let value = encode_u64(counters[class.index()]);
            if kv.get(META, &key)?.as_deref() != Some(&value[..]) {
                kv.put(META, &key, &value)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn counter(&self, class: ObjectClass) -> u64 {
        self.counters.lock()[class.index()]
    }
}
