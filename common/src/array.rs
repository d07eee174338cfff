use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::{Range, RangeInclusive};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Índices de un job array (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayIndices {
    /// Rango contiguo, ambos extremos incluidos.
    Range { first: u32, last: u32 },
    /// Conjunto explícito, siempre ordenado.
    Set(BTreeSet<u32>),
}

/// Especificación de array: índices + límite opcional de slots concurrentes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    pub indices: ArrayIndices,
    pub slot_limit: Option<u32>,
}

impl ArraySpec {
    /// `1..=n`, el default cuando no se pide un array explícito.
    pub fn for_commands(n: u32) -> Self {
        Self::inclusive(1..=n)
    }

    /// `a..b` se interpreta como `a-(b-1)`.
    pub fn exclusive(r: Range<u32>) -> Self {
        Self {
            indices: ArrayIndices::Range {
                first: r.start,
                last: r.end.saturating_sub(1),
            },
            slot_limit: None,
        }
    }

    pub fn inclusive(r: RangeInclusive<u32>) -> Self {
        Self {
            indices: ArrayIndices::Range {
                first: *r.start(),
                last: *r.end(),
            },
            slot_limit: None,
        }
    }

    pub fn set<I: IntoIterator<Item = u32>>(items: I) -> Self {
        Self {
            indices: ArrayIndices::Set(items.into_iter().collect()),
            slot_limit: None,
        }
    }

    pub fn with_slot_limit(mut self, limit: Option<u32>) -> Self {
        self.slot_limit = limit;
        self
    }

    /// Lista ascendente de índices.
    pub fn indices(&self) -> Vec<u32> {
        match &self.indices {
            ArrayIndices::Range { first, last } => (*first..=*last).collect(),
            ArrayIndices::Set(s) => s.iter().copied().collect(),
        }
    }

    /// Expresión para `qsub -t`: `first-last[%cap]` o `i,j,k[%cap]`.
    pub fn expression(&self) -> String {
        let limit = match self.slot_limit {
            Some(n) => format!("%{n}"),
            None => String::new(),
        };
        match &self.indices {
            ArrayIndices::Range { first, last } => format!("{first}-{last}{limit}"),
            ArrayIndices::Set(s) => format!("{}{}", join_indices(s.iter().copied()), limit),
        }
    }

    /// Verifica que el array no esté vacío, no use el índice 0
    /// y que cada índice tenga un comando asociado.
    pub fn validate(&self, command_count: usize) -> Result<()> {
        let indices = self.indices();
        if indices.is_empty() {
            return Err(Error::Config(format!(
                "array vacío: {}",
                self.expression()
            )));
        }
        if indices.first() == Some(&0) {
            return Err(Error::Config("los índices de array empiezan en 1".into()));
        }
        if let Some(&max) = indices.last() {
            if max as usize > command_count {
                return Err(Error::Config(format!(
                    "índice {max} sin comando (hay {command_count} comandos)"
                )));
            }
        }
        if self.slot_limit == Some(0) {
            return Err(Error::Config("slot_limit debe ser > 0".into()));
        }
        Ok(())
    }
}

/// Lista separada por comas, en orden ascendente.
pub fn join_indices<I: IntoIterator<Item = u32>>(indices: I) -> String {
    let mut v: Vec<u32> = indices.into_iter().collect();
    v.sort_unstable();
    v.dedup();
    v.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Acepta `2-4`, `1,3,7` y opcionalmente `%N` al final (formato de `qsub -t`).
impl FromStr for ArraySpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (body, limit) = match s.split_once('%') {
            Some((b, l)) => {
                let l = l
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| Error::Config(format!("slot limit inválido: {s}")))?;
                (b.trim(), Some(l))
            }
            None => (s.trim(), None),
        };

        let bad = || Error::Config(format!("expresión de array inválida: {s}"));

        let spec = if let Some((a, b)) = body.split_once('-') {
            let first = a.trim().parse::<u32>().map_err(|_| bad())?;
            let last = b.trim().parse::<u32>().map_err(|_| bad())?;
            if first > last {
                return Err(bad());
            }
            ArraySpec::inclusive(first..=last)
        } else {
            let items = body
                .split(',')
                .map(|p| p.trim().parse::<u32>().map_err(|_| bad()))
                .collect::<Result<Vec<_>>>()?;
            ArraySpec::set(items)
        };

        Ok(spec.with_slot_limit(limit))
    }
}
