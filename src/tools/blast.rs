use crate::config::BlastConfig;
use crate::remote::SequenceSearch;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// NCBI BLAST over the URL API: submit (`CMD=Put`), poll the search info
/// until ready, then fetch the XML report.
pub struct NcbiBlast {
    client: reqwest::Client,
    config: BlastConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Submission {
    pub rid: String,
    pub estimated_secs: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SearchState {
    Waiting,
    Ready { has_hits: bool },
    Failed(String),
}

fn rid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"RID = (\S+)").expect("valid RID regex"))
}

fn rtoe_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"RTOE = (\d+)").expect("valid RTOE regex"))
}

fn hit_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<Hit_id>pdb\|(\w+)\|").expect("valid Hit_id regex"))
}

pub fn parse_submission(body: &str) -> Option<Submission> {
    let rid = rid_regex().captures(body)?.get(1)?.as_str().to_string();
    let estimated_secs = rtoe_regex()
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    Some(Submission {
        rid,
        estimated_secs,
    })
}

pub fn parse_search_info(body: &str) -> SearchState {
    let field = |name: &str| {
        body.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix(name)?.strip_prefix('='))
            .map(str::trim)
    };

    match field("Status") {
        Some("WAITING") => SearchState::Waiting,
        Some("READY") | None if field("ThereAreHits").is_some() => SearchState::Ready {
            has_hits: field("ThereAreHits") == Some("yes"),
        },
        Some("READY") => SearchState::Ready { has_hits: true },
        Some(other) => SearchState::Failed(format!("search status {}", other)),
        None => SearchState::Failed("search info carries no status".to_string()),
    }
}

/// Candidate PDB ids in report order.
pub fn parse_hit_ids(xml: &str) -> Vec<String> {
    hit_id_regex()
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

impl NcbiBlast {
    pub fn new(config: &BlastConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build BLAST http client")?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn get_text(&self, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(&self.config.url)
            .query(query)
            .send()
            .await
            .context(format!("Request to {} failed", self.config.url))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("BLAST server answered {}: {}", status, body.trim());
        }
        Ok(body)
    }

    pub async fn submit(&self, sequence: &str) -> Result<Submission> {
        let response = self
            .client
            .post(&self.config.url)
            .form(&[
                ("CMD", "Put"),
                ("PROGRAM", self.config.program.as_str()),
                ("DATABASE", self.config.database.as_str()),
                ("QUERY", sequence),
            ])
            .send()
            .await
            .context(format!("BLAST submission to {} failed", self.config.url))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("BLAST submission answered {}", status);
        }
        parse_submission(&body).ok_or_else(|| anyhow!("BLAST submission returned no RID"))
    }

    /// Returns whether the finished search has any hits.
    pub async fn wait_until_ready(&self, submission: &Submission) -> Result<bool> {
        let poll = Duration::from_secs(self.config.poll_interval_secs);
        let deadline = Instant::now() + Duration::from_secs(self.config.max_wait_secs);
        let first_wait = submission
            .estimated_secs
            .map(|secs| Duration::from_secs(secs).min(poll))
            .unwrap_or(poll);
        tokio::time::sleep(first_wait).await;

        loop {
            let info = self
                .get_text(&[
                    ("CMD", "Get"),
                    ("FORMAT_OBJECT", "SearchInfo"),
                    ("RID", submission.rid.as_str()),
                ])
                .await?;
            match parse_search_info(&info) {
                SearchState::Ready { has_hits } => return Ok(has_hits),
                SearchState::Failed(reason) => {
                    anyhow::bail!("BLAST search {} failed: {}", submission.rid, reason)
                }
                SearchState::Waiting => {
                    if Instant::now() >= deadline {
                        anyhow::bail!(
                            "BLAST search {} still running after {}s",
                            submission.rid,
                            self.config.max_wait_secs
                        );
                    }
                    debug!("BLAST search {} still waiting", submission.rid);
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    pub async fn fetch_report(&self, submission: &Submission) -> Result<String> {
        self.get_text(&[
            ("CMD", "Get"),
            ("FORMAT_TYPE", "XML"),
            ("RID", submission.rid.as_str()),
        ])
        .await
    }
}

#[async_trait]
impl SequenceSearch for NcbiBlast {
    async fn search(&self, sequence: &str) -> Result<Vec<String>> {
        let submission = self.submit(sequence).await?;
        info!(
            "Submitted {} search against {} as {}",
            self.config.program, self.config.database, submission.rid
        );
        if !self.wait_until_ready(&submission).await? {
            return Ok(Vec::new());
        }
        let report = self.fetch_report(&submission).await?;
        debug!(
            "BLAST report {}: {}",
            submission.rid,
            report.chars().take(500).collect::<String>()
        );
        let ids = parse_hit_ids(&report);
        info!("Found PDB ids: {:?}", ids);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_server::{serve, SeenRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PUT_BODY: &str = "<html><!--QBlastInfoBegin\n    RID = 8YX2ZJ4R016\n    \
RTOE = 17\nQBlastInfoEnd\n--></html>";

    const REPORT: &str = r#"<BlastOutput_iterations>
<Hit><Hit_num>1</Hit_num><Hit_id>pdb|1ABC|A</Hit_id></Hit>
<Hit><Hit_num>2</Hit_num><Hit_id>pdb|2XYZ|B</Hit_id></Hit>
<Hit><Hit_num>3</Hit_num><Hit_id>sp|P04637|P53_HUMAN</Hit_id></Hit>
<Hit><Hit_num>4</Hit_num><Hit_id>pdb|0AAA|C</Hit_id></Hit>
</BlastOutput_iterations>"#;

    fn fast_config(url: String) -> BlastConfig {
        BlastConfig {
            url,
            poll_interval_secs: 0,
            max_wait_secs: 5,
            ..BlastConfig::default()
        }
    }

    #[test]
    fn hit_ids_keep_report_order_and_skip_non_pdb_hits() {
        assert_eq!(parse_hit_ids(REPORT), vec!["1ABC", "2XYZ", "0AAA"]);
        assert!(parse_hit_ids("<BlastOutput/>").is_empty());
    }

    #[test]
    fn submission_carries_rid_and_estimate() {
        assert_eq!(
            parse_submission(PUT_BODY),
            Some(Submission {
                rid: "8YX2ZJ4R016".into(),
                estimated_secs: Some(17)
            })
        );
        assert_eq!(parse_submission("<html>error</html>"), None);
    }

    #[test]
    fn search_info_states() {
        assert_eq!(
            parse_search_info("QBlastInfoBegin\n\tStatus=WAITING\nQBlastInfoEnd"),
            SearchState::Waiting
        );
        assert_eq!(
            parse_search_info(
                "QBlastInfoBegin\n\tStatus=READY\nQBlastInfoEnd\n\
QBlastInfoBegin\n\tThereAreHits=no\nQBlastInfoEnd"
            ),
            SearchState::Ready { has_hits: false }
        );
        assert_eq!(
            parse_search_info("QBlastInfoBegin\n\tThereAreHits=yes\nQBlastInfoEnd"),
            SearchState::Ready { has_hits: true }
        );
        assert!(matches!(
            parse_search_info("QBlastInfoBegin\n\tStatus=UNKNOWN\nQBlastInfoEnd"),
            SearchState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn search_submits_polls_and_parses_report() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let (base, seen) = serve(Arc::new(move |req: &SeenRequest| {
            if req.method == "POST" {
                return (200, PUT_BODY.as_bytes().to_vec());
            }
            if req.target.contains("FORMAT_OBJECT=SearchInfo") {
                let status = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    "Status=WAITING"
                } else {
                    "Status=READY\nThereAreHits=yes"
                };
                return (200, status.as_bytes().to_vec());
            }
            if req.target.contains("FORMAT_TYPE=XML") {
                return (200, REPORT.as_bytes().to_vec());
            }
            (400, Vec::new())
        }))
        .await;

        let config = fast_config(format!("{}/Blast.cgi", base));
        let blast = NcbiBlast::new(&config, Duration::from_secs(5)).unwrap();
        let ids = blast.search("MEEPQSDPSV").await.unwrap();
        assert_eq!(ids, vec!["1ABC", "2XYZ", "0AAA"]);
        assert_eq!(polls.load(Ordering::SeqCst), 2);

        let seen = seen.lock().unwrap();
        assert!(seen[0].body.contains("CMD=Put"));
        assert!(seen[0].body.contains("PROGRAM=blastp"));
        assert!(seen[0].body.contains("DATABASE=pdb"));
        assert!(seen[0].body.contains("QUERY=MEEPQSDPSV"));
    }

    #[tokio::test]
    async fn search_without_hits_skips_report() {
        let (base, seen) = serve(Arc::new(|req: &SeenRequest| {
            if req.method == "POST" {
                (200, PUT_BODY.as_bytes().to_vec())
            } else {
                (200, b"Status=READY\nThereAreHits=no".to_vec())
            }
        }))
        .await;

        let blast = NcbiBlast::new(&fast_config(base), Duration::from_secs(5)).unwrap();
        assert!(blast.search("MEEP").await.unwrap().is_empty());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
