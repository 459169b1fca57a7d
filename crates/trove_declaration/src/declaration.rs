//! The provenance declaration of one run.
//!
//! A JSON-LD document with a fixed shape: a single transparent research
//! object node holding the system that assembled it, its composition, the
//! initial and final arrangements, and the performance that turned one into
//! the other. Node identifiers are relative to a base IRI derived from the
//! result archive's name.
//!
//! Building is pure. The bytes that get signed are those of
//! [`Declaration::canonical_bytes`].

use serde::{Deserialize, Serialize};
use trove_core::{ArchiveId, Timestamp, TrsIdentity, to_canonical_bytes};

use crate::composition::Composition;
use crate::error::{DeclarationError, DeclarationResult};

/// RDF namespace
pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
/// RDF Schema namespace
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
/// TRACE vocabulary namespace
pub const TROV: &str = "https://w3id.org/trace/2023/05/trov#";

const ARRANGEMENT_COMMENTS: [&str; 2] = ["Initial arrangement", "Final arrangement"];

/// `{"@id": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    /// Referenced node
    #[serde(rename = "@id")]
    pub id: String,
}

impl IdRef {
    fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// JSON-LD context entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// RDF prefix
    pub rdf: String,
    /// RDFS prefix
    pub rdfs: String,
    /// TRACE vocabulary prefix
    pub trov: String,
    /// Base IRI of relative node ids
    #[serde(rename = "@base")]
    pub base: String,
}

/// A node with only identity and type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
}

/// An attribute claim and what warrants it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Attribute type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Node warranting the claim
    #[serde(rename = "trov:warrantedBy")]
    pub warranted_by: IdRef,
}

/// The trusted research system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Description
    #[serde(rename = "rdfs:comment")]
    pub comment: String,
    /// Armored public key verifying the signature
    #[serde(rename = "trov:publicKey")]
    pub public_key: String,
    /// Capabilities the system claims
    #[serde(rename = "trov:hasCapability")]
    pub capabilities: Vec<TypedNode>,
}

/// Composition fingerprint node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Fingerprint hex
    #[serde(rename = "trov:sha256")]
    pub sha256: String,
}

/// One research artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Sniffed media type
    #[serde(rename = "trov:mimeType")]
    pub mime_type: String,
    /// Content digest hex
    #[serde(rename = "trov:sha256")]
    pub sha256: String,
}

/// Composition node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Fingerprint
    #[serde(rename = "trov:hasFingerprint")]
    pub fingerprint: FingerprintNode,
    /// Artifacts, ascending by digest
    #[serde(rename = "trov:hasArtifact")]
    pub artifacts: Vec<ArtifactNode>,
}

/// Location of an artifact in one arrangement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocusNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Artifact found here
    #[serde(rename = "trov:hasArtifact")]
    pub artifact: IdRef,
    /// Payload-relative path
    #[serde(rename = "trov:hasLocation")]
    pub location: String,
}

/// Arrangement node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrangementNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Description
    #[serde(rename = "rdfs:comment")]
    pub comment: String,
    /// Loci, in artifact order
    #[serde(rename = "trov:hasLocus")]
    pub loci: Vec<LocusNode>,
}

/// The execution that produced the final arrangement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Description
    #[serde(rename = "rdfs:comment")]
    pub comment: String,
    /// System that ran it
    #[serde(rename = "trov:wasConductedBy")]
    pub conducted_by: IdRef,
    /// ISO 8601 start
    #[serde(rename = "trov:startedAtTime")]
    pub started_at: String,
    /// ISO 8601 end
    #[serde(rename = "trov:endedAtTime")]
    pub ended_at: String,
    /// Arrangement read
    #[serde(rename = "trov:accessedArrangement")]
    pub accessed: IdRef,
    /// Arrangement written
    #[serde(rename = "trov:modifiedArrangement")]
    pub modified: IdRef,
    /// Isolation the run had, absent when network was enabled
    #[serde(
        rename = "trov:hadPerformanceAttribute",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attribute: Option<AttributeNode>,
}

/// Root node of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroNode {
    /// Node id
    #[serde(rename = "@id")]
    pub id: String,
    /// Node type
    #[serde(rename = "@type")]
    pub kind: String,
    /// Assembling system
    #[serde(rename = "trov:wasAssembledBy")]
    pub system: SystemNode,
    /// Object-level attributes
    #[serde(
        rename = "trov:hasAttribute",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attributes: Vec<AttributeNode>,
    /// Artifact composition
    #[serde(rename = "trov:hasComposition")]
    pub composition: CompositionNode,
    /// Initial and final arrangements
    #[serde(rename = "trov:hasArrangement")]
    pub arrangements: Vec<ArrangementNode>,
    /// The performance
    #[serde(rename = "trov:hasPerformance")]
    pub performance: PerformanceNode,
}

/// A complete declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// JSON-LD context
    #[serde(rename = "@context")]
    pub context: Vec<Context>,
    /// Graph nodes; exactly one for declarations built here
    #[serde(rename = "@graph")]
    pub graph: Vec<TroNode>,
}

impl Declaration {
    /// Canonical bytes: sorted keys, two-space indentation, ASCII only
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn canonical_bytes(&self) -> DeclarationResult<Vec<u8>> {
        Ok(to_canonical_bytes(self)?)
    }

    /// Parse declaration text
    ///
    /// # Errors
    ///
    /// Returns `DeclarationError::Parse` if the text is not a declaration
    pub fn from_slice(bytes: &[u8]) -> DeclarationResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The root node
    ///
    /// # Errors
    ///
    /// Returns `DeclarationError::Malformed` for an empty graph
    pub fn tro(&self) -> DeclarationResult<&TroNode> {
        self.graph
            .first()
            .ok_or_else(|| DeclarationError::Malformed("empty @graph".to_string()))
    }

    /// Armored public key of the assembling system
    ///
    /// # Errors
    ///
    /// Returns `DeclarationError::Malformed` for an empty graph
    pub fn public_key(&self) -> DeclarationResult<&str> {
        Ok(self.tro()?.system.public_key.as_str())
    }

    /// Locations recorded for arrangement `ordinal`
    #[must_use]
    pub fn locations(&self, ordinal: usize) -> Vec<&str> {
        self.graph
            .first()
            .and_then(|tro| tro.arrangements.get(ordinal))
            .map(|arr| arr.loci.iter().map(|l| l.location.as_str()).collect())
            .unwrap_or_default()
    }
}

/// When the performance ran and with what isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Performance {
    /// Start of execution
    pub started_at: Timestamp,
    /// End of execution
    pub ended_at: Timestamp,
    /// Whether the container had network access
    pub network_enabled: bool,
}

/// Assembles declarations for one system identity
#[derive(Debug, Clone)]
pub struct DeclarationBuilder {
    trs: TrsIdentity,
    public_key: String,
}

impl DeclarationBuilder {
    /// Builder for `trs`, embedding `public_key`
    #[must_use]
    pub fn new(trs: TrsIdentity, public_key: impl Into<String>) -> Self {
        Self {
            trs,
            public_key: public_key.into(),
        }
    }

    /// Declaration for the run whose result archive is
    /// `<basename>_run.zip`
    #[must_use]
    pub fn build(
        &self,
        basename: &str,
        composition: &Composition,
        performance: &Performance,
    ) -> Declaration {
        let archive = ArchiveId::derive(&self.trs.id, basename);
        let isolated = !performance.network_enabled;

        let artifacts: Vec<ArtifactNode> = composition
            .artifacts()
            .iter()
            .enumerate()
            .map(|(seq, a)| ArtifactNode {
                id: artifact_id(seq),
                kind: "trov:ResearchArtifact".to_string(),
                mime_type: a.mime_type.clone(),
                sha256: a.digest.to_hex(),
            })
            .collect();

        let arrangements = ARRANGEMENT_COMMENTS
            .iter()
            .zip(0u32..)
            .map(|(comment, ordinal)| ArrangementNode {
                id: format!("arrangement/{ordinal}"),
                kind: "trov:ArtifactArrangement".to_string(),
                comment: (*comment).to_string(),
                loci: composition
                    .loci(ordinal)
                    .iter()
                    .enumerate()
                    .map(|(seq, locus)| LocusNode {
                        id: format!("arrangement/{ordinal}/locus/{seq}"),
                        kind: "trov:ArtifactLocus".to_string(),
                        artifact: IdRef::new(artifact_id(locus.artifact)),
                        location: locus.location.to_string(),
                    })
                    .collect(),
            })
            .collect();

        let attributes = if isolated {
            vec![AttributeNode {
                id: "tro/attribute/1".to_string(),
                kind: "trov:IncludesAllInputData".to_string(),
                warranted_by: IdRef::new("trp/1/attribute/1"),
            }]
        } else {
            Vec::new()
        };

        let tro = TroNode {
            id: "tro".to_string(),
            kind: "trov:TransparentResearchObject".to_string(),
            system: SystemNode {
                id: "trs".to_string(),
                kind: "trov:TrustedResearchSystem".to_string(),
                comment: self.trs.comment.clone(),
                public_key: self.public_key.clone(),
                capabilities: vec![TypedNode {
                    id: "trs/capability/1".to_string(),
                    kind: "trov:CanProvideInternetIsolation".to_string(),
                }],
            },
            attributes,
            composition: CompositionNode {
                id: "composition/1".to_string(),
                kind: "trov:ArtifactComposition".to_string(),
                fingerprint: FingerprintNode {
                    id: "fingerprint".to_string(),
                    kind: "trov:CompositionFingerprint".to_string(),
                    sha256: composition.fingerprint().to_hex(),
                },
                artifacts,
            },
            arrangements,
            performance: PerformanceNode {
                id: "trp/1".to_string(),
                kind: "trov:TrustedResearchPerformance".to_string(),
                comment: "Workflow execution".to_string(),
                conducted_by: IdRef::new("trs"),
                started_at: performance.started_at.to_iso8601(),
                ended_at: performance.ended_at.to_iso8601(),
                accessed: IdRef::new("arrangement/0"),
                modified: IdRef::new("arrangement/1"),
                attribute: isolated.then(|| AttributeNode {
                    id: "trp/1/attribute/1".to_string(),
                    kind: "trov:InternetIsolation".to_string(),
                    warranted_by: IdRef::new("trs/capability/1"),
                }),
            },
        };

        Declaration {
            context: vec![Context {
                rdf: RDF.to_string(),
                rdfs: RDFS.to_string(),
                trov: TROV.to_string(),
                base: archive.base_iri(),
            }],
            graph: vec![tro],
        }
    }
}

fn artifact_id(seq: usize) -> String {
    format!("composition/1/artifact/{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_core::Sha256Digest;

    fn composition() -> Composition {
        let script = Sha256Digest::compute(b"echo hello > out.txt\n");
        let out = Sha256Digest::compute(b"hello\n");
        Composition::assemble(
            vec![
                (0, script, "data/run.sh".to_string()),
                (1, script, "data/run.sh".to_string()),
                (1, out, "data/out.txt".to_string()),
            ],
            |_, _| Ok("text/plain".to_string()),
        )
        .unwrap()
    }

    fn performance(network_enabled: bool) -> Performance {
        let at = Timestamp::parse("2026-01-02T03:04:05.000006Z").unwrap();
        Performance {
            started_at: at,
            ended_at: at,
            network_enabled,
        }
    }

    fn builder() -> DeclarationBuilder {
        DeclarationBuilder::new(TrsIdentity::default(), "PUBKEY")
    }

    #[test]
    fn test_shape() {
        let decl = builder().build("run-1", &composition(), &performance(false));
        let value = serde_json::to_value(&decl).unwrap();

        let base = value["@context"][0]["@base"].as_str().unwrap();
        assert!(base.starts_with("arcp://uuid,"));
        assert_eq!(value["@context"][0]["trov"], TROV);

        let tro = &value["@graph"][0];
        assert_eq!(tro["@type"], "trov:TransparentResearchObject");
        assert_eq!(tro["trov:wasAssembledBy"]["trov:publicKey"], "PUBKEY");
        assert_eq!(
            tro["trov:wasAssembledBy"]["trov:hasCapability"][0]["@type"],
            "trov:CanProvideInternetIsolation"
        );
        assert_eq!(tro["trov:hasAttribute"][0]["@type"], "trov:IncludesAllInputData");
        assert_eq!(
            tro["trov:hasComposition"]["trov:hasArtifact"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            tro["trov:hasArrangement"][1]["rdfs:comment"],
            "Final arrangement"
        );
        assert_eq!(
            tro["trov:hasPerformance"]["trov:hadPerformanceAttribute"]["trov:warrantedBy"]["@id"],
            "trs/capability/1"
        );
        assert_eq!(
            tro["trov:hasPerformance"]["trov:startedAtTime"],
            "2026-01-02T03:04:05.000006Z"
        );
    }

    #[test]
    fn test_loci_reference_artifacts() {
        let decl = builder().build("run-1", &composition(), &performance(false));
        assert_eq!(decl.locations(0), vec!["run.sh"]);
        let final_locs = decl.locations(1);
        assert_eq!(final_locs.len(), 2);
        assert!(final_locs.contains(&"out.txt"));

        let tro = decl.tro().unwrap();
        let ids: Vec<_> = tro.composition.artifacts.iter().map(|a| a.id.as_str()).collect();
        for locus in &tro.arrangements[1].loci {
            assert!(ids.contains(&locus.artifact.id.as_str()));
        }
        assert_eq!(tro.arrangements[1].loci[1].id, "arrangement/1/locus/1");
    }

    #[test]
    fn test_network_enabled_drops_isolation_claims() {
        let decl = builder().build("run-1", &composition(), &performance(true));
        let tro = decl.tro().unwrap();
        assert!(tro.attributes.is_empty());
        assert!(tro.performance.attribute.is_none());
        // the capability stays; only the claim about this run is withdrawn
        assert_eq!(tro.system.capabilities.len(), 1);
        let value = serde_json::to_value(&decl).unwrap();
        assert!(value["@graph"][0].get("trov:hasAttribute").is_none());
    }

    #[test]
    fn test_build_is_pure_and_canonical_bytes_stable() {
        let comp = composition();
        let a = builder().build("run-1", &comp, &performance(false));
        let b = builder().build("run-1", &comp, &performance(false));
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());

        let bytes = a.canonical_bytes().unwrap();
        let parsed = Declaration::from_slice(&bytes).unwrap();
        assert_eq!(parsed, a);
        assert_eq!(parsed.canonical_bytes().unwrap(), bytes);
        assert_eq!(parsed.public_key().unwrap(), "PUBKEY");
    }

    #[test]
    fn test_base_depends_on_archive_name() {
        let comp = composition();
        let a = builder().build("run-1", &comp, &performance(false));
        let b = builder().build("run-2", &comp, &performance(false));
        assert_ne!(a.context[0].base, b.context[0].base);
        assert_eq!(
            a.context[0].base,
            ArchiveId::derive(&TrsIdentity::default().id, "run-1").base_iri()
        );
    }

    #[test]
    fn test_from_slice_rejects_other_json() {
        assert!(matches!(
            Declaration::from_slice(br#"{"hello": 1}"#),
            Err(DeclarationError::Parse(_))
        ));
        let empty = Declaration {
            context: Vec::new(),
            graph: Vec::new(),
        };
        assert!(matches!(empty.tro(), Err(DeclarationError::Malformed(_))));
    }
}
