//! Known datasets and their column layouts
//!
//! Source files have no header row, so the column layout of every dataset
//! must be declared up front. The built-in catalogue follows the layout of
//! the Receita Federal "Dados Abertos CNPJ" release, and users can provide
//! their own as JSON.

use crate::Result;
use anyhow::Context;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::Arc,
};

/// Immutable description of one dataset
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DatasetSpec {
    /// File name of the compressed archive, e.g. "Empresas0.zip"
    pub archive: Box<str>,

    /// Ordered column names, one per field of every record
    pub columns: Arc<[Box<str>]>,
}
//
impl DatasetSpec {
    /// Describe a dataset
    pub fn new(
        archive: impl Into<Box<str>>,
        columns: impl IntoIterator<Item = impl Into<Box<str>>>,
    ) -> Self {
        Self {
            archive: archive.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of fields that every record must have
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Name of the output file
    ///
    /// This is the lower-cased archive name with the archive extension
    /// replaced by ".parquet", so "Empresas0.zip" becomes "empresas0.parquet".
    pub fn output_name(&self) -> Box<str> {
        let lower = self.archive.to_lowercase();
        let stem = lower.strip_suffix(".zip").unwrap_or(&lower);
        format!("{stem}.parquet").into()
    }

    /// Check that the declared layout is usable
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.columns.is_empty(),
            "dataset {} declares no column",
            self.archive
        );
        let mut seen = HashSet::new();
        for column in self.columns.iter() {
            anyhow::ensure!(
                seen.insert(column),
                "dataset {} declares column {column:?} twice",
                self.archive
            );
        }
        Ok(())
    }
}

/// Mapping from archive name to dataset description
///
/// Iteration follows archive name order, which has no semantic meaning since
/// datasets are transformed independently.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Catalog(BTreeMap<Box<str>, DatasetSpec>);
//
impl Catalog {
    /// Build a catalogue from dataset descriptions
    pub fn new(specs: impl IntoIterator<Item = DatasetSpec>) -> Result<Self> {
        let mut datasets = BTreeMap::new();
        for spec in specs {
            spec.validate()?;
            let archive = spec.archive.clone();
            anyhow::ensure!(
                datasets.insert(archive.clone(), spec).is_none(),
                "dataset {archive} is declared twice"
            );
        }
        Ok(Self(datasets))
    }

    /// Load a catalogue from a JSON object mapping archive names to columns
    pub fn from_json(path: &Path) -> Result<Self> {
        let context = || format!("loading dataset catalogue from {}", path.display());
        let json = std::fs::read(path).with_context(context)?;
        Self::from_json_bytes(&json).with_context(context)
    }

    /// Parse a JSON catalogue that was already loaded in memory
    pub fn from_json_bytes(json: &[u8]) -> Result<Self> {
        let CatalogFile(layouts) =
            serde_json::from_slice(json).context("decoding catalogue JSON")?;
        Self::new(
            layouts
                .into_iter()
                .map(|(archive, columns)| DatasetSpec::new(archive, columns)),
        )
    }

    /// Built-in layout of the CNPJ open data release
    pub fn cnpj() -> Self {
        const CODE_DESCRIPTION: &[&str] = &["codigo", "descricao"];
        let layouts: [(&str, &[&str]); 8] = [
            ("Cnaes.zip", CODE_DESCRIPTION),
            (
                "Empresas0.zip",
                &[
                    "cnpj",
                    "razao social",
                    "natureza juridica",
                    "qualificacao responsavel",
                    "capital social",
                    "porte",
                ],
            ),
            (
                "Estabelecimentos0.zip",
                &[
                    "cnpj",
                    "cpj ordem",
                    "cnpj dv",
                    "id matriz",
                    "nome fantasia",
                    "situacao cadastral",
                    "data situacao",
                    "motivo situacao",
                    "cidade exterior",
                    "pais",
                    "inicio atividade",
                    "cnae principal",
                    "cnae secundario",
                    "tipo logradouro",
                    "logradouro",
                    "numero",
                    "complemento",
                    "bairro",
                    "cep",
                    "uf",
                    "municipio",
                    "ddd1",
                    "telefone1",
                    "ddd2",
                    "telefone2",
                    "ddd fax",
                    "fax",
                    "correio eletronico",
                    "situacao",
                    "data situacao_extra",
                ],
            ),
            ("Municipios.zip", CODE_DESCRIPTION),
            ("Naturezas.zip", CODE_DESCRIPTION),
            ("Paises.zip", CODE_DESCRIPTION),
            ("Qualificacoes.zip", CODE_DESCRIPTION),
            (
                "Socios0.zip",
                &[
                    "cnpj",
                    "id socio",
                    "nome socio",
                    "cnpj socio",
                    "qualificacao",
                    "data entrada",
                    "pais",
                    "representante",
                    "nome representante",
                    "qualificacao representante",
                    "faixa etaria",
                ],
            ),
        ];
        Self::new(
            layouts
                .into_iter()
                .map(|(archive, columns)| DatasetSpec::new(archive, columns.iter().copied())),
        )
        .expect("the built-in catalogue should be valid")
    }

    /// Restrict the catalogue to the named datasets
    pub fn select(mut self, archives: &[impl AsRef<str>]) -> Result<Self> {
        let mut selected = BTreeMap::new();
        for archive in archives {
            let archive = archive.as_ref();
            let (name, spec) = self
                .0
                .remove_entry(archive)
                .with_context(|| format!("dataset {archive} is not in the catalogue"))?;
            selected.insert(name, spec);
        }
        Ok(Self(selected))
    }

    /// Number of datasets
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over datasets
    pub fn iter(&self) -> impl Iterator<Item = &DatasetSpec> {
        self.0.values()
    }
}

/// On-disk catalogue format
#[derive(Deserialize)]
#[serde(transparent)]
struct CatalogFile(BTreeMap<Box<str>, Vec<Box<str>>>);
