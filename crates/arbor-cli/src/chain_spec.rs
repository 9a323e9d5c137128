//! Text chain descriptions.
//!
//! ```text
//! gain:gain=-6 | par(delay:samples=64 | saturator:drive=12) | delay:samples=10
//! ```
//!
//! Items are separated by `|`. An item is a bundled plugin uid with optional
//! `name=value` parameters, or a `par(...)` / `ser(...)` group holding a
//! nested list. The top level is the serial root chain.

use arbor_chain::{BuiltinProvider, ChainNodeId, ChainProcessor, GroupMode};

/// One parsed item.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecItem {
    /// A bundled plugin and parameter assignments by name.
    Plugin {
        uid: String,
        params: Vec<(String, f32)>,
    },
    /// A nested group.
    Group { mode: GroupMode, items: Vec<SpecItem> },
}

/// Parses a chain string.
pub fn parse_chain(spec: &str) -> anyhow::Result<Vec<SpecItem>> {
    let mut parser = Parser { src: spec, pos: 0 };
    let items = parser.list(false)?;
    if items.is_empty() {
        anyhow::bail!("empty chain");
    }
    Ok(items)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Reads until one of `stops` or the end, trimmed.
    fn until(&mut self, stops: &[char]) -> &str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        self.src[start..self.pos].trim()
    }

    fn list(&mut self, nested: bool) -> anyhow::Result<Vec<SpecItem>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if nested && self.peek() == Some(')') {
                self.pos += 1;
                return Ok(items);
            }
            if self.peek().is_none() {
                if nested {
                    anyhow::bail!("unclosed group at end of chain");
                }
                return Ok(items);
            }
            items.push(self.item()?);
            self.skip_ws();
            match self.peek() {
                Some('|') => self.pos += 1,
                Some(')') if nested => {}
                None => {}
                Some(c) => anyhow::bail!("unexpected '{c}' at position {}", self.pos),
            }
        }
    }

    fn item(&mut self) -> anyhow::Result<SpecItem> {
        let name = self.until(&[':', '|', '(', ')']).to_string();
        if name.is_empty() {
            anyhow::bail!("missing plugin name at position {}", self.pos);
        }
        if self.peek() == Some('(') {
            let mode = match name.as_str() {
                "par" => GroupMode::Parallel,
                "ser" => GroupMode::Serial,
                other => anyhow::bail!("unknown group kind '{other}' (expected par or ser)"),
            };
            self.pos += 1;
            let items = self.list(true)?;
            if items.is_empty() {
                anyhow::bail!("empty {name}() group");
            }
            return Ok(SpecItem::Group { mode, items });
        }

        let mut params = Vec::new();
        if self.peek() == Some(':') {
            self.pos += 1;
            let raw = self.until(&['|', ')']).to_string();
            for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((key, value)) = pair.split_once('=') else {
                    anyhow::bail!("invalid parameter '{pair}' (expected name=value)");
                };
                let value: f32 = value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid value in '{pair}'"))?;
                params.push((key.trim().to_string(), value));
            }
        }
        Ok(SpecItem::Plugin { uid: name, params })
    }
}

/// Adds `items` under `parent` and returns the ids of the added top-level nodes.
pub fn build_chain(
    chain: &mut ChainProcessor,
    parent: ChainNodeId,
    items: &[SpecItem],
) -> anyhow::Result<Vec<ChainNodeId>> {
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SpecItem::Plugin { uid, params } => {
                let identity = BuiltinProvider::identity(uid).ok_or_else(|| {
                    let known: Vec<String> =
                        BuiltinProvider::available().into_iter().map(|i| i.uid).collect();
                    anyhow::anyhow!("unknown plugin '{uid}' (available: {})", known.join(", "))
                })?;
                let id = chain.add_plugin(identity, parent, usize::MAX)?;
                apply_params(chain, id, params)?;
                ids.push(id);
            }
            SpecItem::Group { mode, items } => {
                let children = build_chain(chain, parent, items)?;
                ids.push(chain.create_group(&children, *mode, None)?);
            }
        }
    }
    chain.refresh_latency()?;
    Ok(ids)
}

fn apply_params(
    chain: &ChainProcessor,
    id: ChainNodeId,
    params: &[(String, f32)],
) -> anyhow::Result<()> {
    let flat = chain
        .root()
        .flat_index_of(id)
        .ok_or_else(|| anyhow::anyhow!("plugin {id} not in chain"))?;
    for (name, value) in params {
        let index = (0..chain.plugin_parameter_count(flat))
            .find(|&i| {
                chain
                    .plugin_parameter_info(flat, i)
                    .is_some_and(|info| info.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| anyhow::anyhow!("plugin {id} has no parameter '{name}'"))?;
        chain.set_plugin_parameter(flat, index, *value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use arbor_chain::EngineConfig;

    fn plugin(uid: &str, params: &[(&str, f32)]) -> SpecItem {
        SpecItem::Plugin {
            uid: uid.into(),
            params: params.iter().map(|&(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn parses_serial_list_with_params() {
        let items = parse_chain("gain:gain=-6 | delay:samples=64").unwrap();
        assert_eq!(
            items,
            vec![plugin("gain", &[("gain", -6.0)]), plugin("delay", &[("samples", 64.0)])]
        );
    }

    #[test]
    fn parses_nested_groups() {
        let items = parse_chain("par(gain | ser(delay:samples=5, | saturator)) | gain").unwrap();
        assert_eq!(items.len(), 2);
        let SpecItem::Group { mode, items: inner } = &items[0] else {
            panic!("expected group");
        };
        assert_eq!(*mode, GroupMode::Parallel);
        assert!(matches!(&inner[1], SpecItem::Group { mode: GroupMode::Serial, items } if items.len() == 2));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(parse_chain("").is_err());
        assert!(parse_chain("par(gain").is_err());
        assert!(parse_chain("par()").is_err());
        assert!(parse_chain("mix(gain)").is_err());
        assert!(parse_chain("gain:gain").is_err());
        assert!(parse_chain("gain:gain=loud").is_err());
        assert!(parse_chain("gain | ) ").is_err());
    }

    #[test]
    fn builds_chain_with_latency() {
        let (mut chain, _audio) =
            ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
        let items = parse_chain("par(gain | delay:samples=48) | delay:samples=2").unwrap();
        let ids = build_chain(&mut chain, ChainNodeId::ROOT, &items).unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(chain.plugin_count(), 3);
        assert_eq!(chain.total_latency_samples(), 50);
    }

    #[test]
    fn unknown_plugin_or_parameter_fails() {
        let (mut chain, _audio) =
            ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
        let err = build_chain(&mut chain, ChainNodeId::ROOT, &[plugin("reverb", &[])]).unwrap_err();
        assert!(err.to_string().contains("available"), "got: {err}");
        assert!(build_chain(&mut chain, ChainNodeId::ROOT, &[plugin("gain", &[("mix", 1.0)])]).is_err());
    }
}
