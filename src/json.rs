//! The DoH-JSON representation of a DNS [`Message`], mirroring the format of
//! Google's `dns.google/resolve` API.
//!
//! Two deliberate asymmetries, inherited from that format:
//!
//! * The AA flag is omitted, and the QR flag is implied (the JSON form is
//!   only used for replies). [`Message::from_doh_json`] takes an `imply_qr`
//!   argument to set QR on the reconstructed message.
//! * The class is fixed to IN, and ECS fields are neither encoded or decoded.
//!
//! See <https://developers.google.com/speed/public-dns/docs/doh/json>

use crate::errors::ParseError;
use crate::types::*;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageJson {
    /// Standard DNS response code (32 bit integer).
    #[serde(rename = "Status", default)]
    pub status: u32,

    /// Whether the response is truncated.
    #[serde(rename = "TC", default)]
    pub tc: bool,

    /// Recursion desired.
    #[serde(rename = "RD", default)]
    pub rd: bool,

    /// Recursion available.
    #[serde(rename = "RA", default)]
    pub ra: bool,

    /// Whether all response data was validated with DNSSEC.
    #[serde(rename = "AD", default)]
    pub ad: bool,

    /// Whether the client asked to disable DNSSEC.
    #[serde(rename = "CD", default)]
    pub cd: bool,

    #[serde(rename = "Question", default)]
    pub question: Vec<QuestionJson>,

    #[serde(rename = "Answer", default)]
    pub answer: Vec<RecordJson>,

    #[serde(rename = "Authority", default)]
    pub authority: Vec<RecordJson>,

    #[serde(rename = "Additional", default)]
    pub additional: Vec<RecordJson>,

    /// Diagnostic text some servers attach to their replies.
    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    // The ecs field is carried opaquely, never encoded or decoded.
    #[serde(
        rename = "edns_client_subnet",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub edns_client_subnet: Option<String>,
}

/// Basically a Question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionJson {
    /// FQDN with trailing dot.
    pub name: String,

    /// Standard DNS RR type, numeric.
    pub r#type: u16,
}

/// Basically a Record + Resource.
///
/// An empty rrset is represented by an item carrying only `name` and `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordJson {
    pub name: String,
    pub r#type: u16,

    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// The record data in canonical presentation form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

fn flatten(records: &[Record]) -> Vec<RecordJson> {
    records
        .iter()
        .map(|r| RecordJson {
            name: r.name.clone(),
            r#type: r.r#type() as u16,
            ttl: Some(r.ttl),
            data: Some(r.resource.to_string()),
        })
        .collect()
}

fn unflatten(items: &[RecordJson]) -> Result<Vec<Record>, ParseError> {
    let mut records = Vec::with_capacity(items.len());

    for item in items {
        // Items without data mark an empty rrset and carry no record.
        let data = match &item.data {
            Some(data) => data,
            None => continue,
        };

        let r#type: Type =
            FromPrimitive::from_u16(item.r#type).ok_or(ParseError::InvalidType(item.r#type))?;

        let resource = Resource::from_str(r#type, data)
            .map_err(|e| ParseError::InvalidResource(r#type, e))?;

        records.push(Record {
            name: item.name.clone(),
            class: Class::Internet,
            ttl: item.ttl.unwrap_or(0),
            resource,
        });
    }

    Ok(records)
}

impl Message {
    /// Returns the DoH-JSON representation of this message.
    pub fn to_doh_json(&self) -> MessageJson {
        MessageJson {
            status: self.rcode as u16 as u32,
            tc: self.tc,
            rd: self.rd,
            ra: self.ra,
            ad: self.ad,
            cd: self.cd,

            question: self
                .questions
                .iter()
                .map(|q| QuestionJson {
                    name: q.name.clone(),
                    r#type: q.r#type as u16,
                })
                .collect(),

            answer: flatten(&self.answers),
            authority: flatten(&self.authoritys),
            additional: flatten(&self.additionals),

            comment: None,
            edns_client_subnet: None,
        }
    }

    /// Reconstructs a [`Message`] from its DoH-JSON representation.
    ///
    /// With `imply_qr` set, the QR flag is turned on in the result, since the
    /// JSON form carries no QR bit of its own.
    pub fn from_doh_json(json: MessageJson, imply_qr: bool) -> Result<Message, ParseError> {
        let rcode =
            FromPrimitive::from_u32(json.status).ok_or(ParseError::InvalidStatus(json.status))?;

        let mut m = Message {
            rcode,
            tc: json.tc,
            rd: json.rd,
            ra: json.ra,
            ad: json.ad,
            cd: json.cd,

            aa: false,
            z: false,
            qr: QR::from_bool(imply_qr),

            ..Default::default()
        };

        for question in &json.question {
            let r#type = FromPrimitive::from_u16(question.r#type)
                .ok_or(ParseError::InvalidType(question.r#type))?;

            m.questions.push(Question {
                name: question.name.clone(),
                r#type,
                class: Class::Internet,
            });
        }

        m.answers = unflatten(&json.answer)?;
        m.authoritys = unflatten(&json.authority)?;
        m.additionals = unflatten(&json.additional)?;

        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{MX, SOA};
    use json_comments::StripComments;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    #[test]
    fn test_parse_response() {
        // From https://developers.google.com/speed/public-dns/docs/doh/json
        let tests = [
            r#"{
          "Status": 0,  // NOERROR - Standard DNS response code (32 bit integer).
          "TC": false,  // Whether the response is truncated
          "RD": true,   // Always true for Google Public DNS
          "RA": true,   // Always true for Google Public DNS
          "AD": false,  // Whether all response data was validated with DNSSEC
          "CD": false,  // Whether the client asked to disable DNSSEC
          "Question":
          [
            {
              "name": "apple.com.",  // FQDN with trailing dot
              "type": 1              // A - Standard DNS RR type
            }
          ],
          "Answer":
          [
            {
              "name": "apple.com.",   // Always matches name in the Question section
              "type": 1,              // A - Standard DNS RR type
              "TTL": 3599,            // Record's time-to-live in seconds
              "data": "17.178.96.59"  // Data for A - IP address as text
            },
            {
              "name": "apple.com.",
              "type": 1,
              "TTL": 3599,
              "data": "17.172.224.47"
            }
          ],
          "edns_client_subnet": "12.34.56.78/0"  // IP address / scope prefix-length
        }"#,
            r#"
        {
          "Status": 2,  // SERVFAIL - Standard DNS response code (32 bit integer).
          "TC": false,
          "RD": true,
          "RA": true,
          "AD": false,
          "CD": false,
          "Question":
          [
            {
              "name": "dnssec-failed.org.",
              "type": 1
            }
          ],
          "Comment": "DNSSEC validation failure. Please check http://dnsviz.net/d/dnssec-failed.org/dnssec/."
        }
        "#,
            // From https://developers.cloudflare.com/1.1.1.1/encrypted-dns/dns-over-https/make-api-requests/dns-json
            r#"{
          "Status": 0,
          "TC": false,
          "RD": true,
          "RA": true,
          "AD": true,
          "CD": false,
          "Question": [
            {
              "name": "example.com.",
              "type": 28
            }
          ],
          "Answer": [
            {
              "name": "example.com.",
              "type": 28,
              "TTL": 1726,
              "data": "2606:2800:220:1:248:1893:25c8:1946"
            }
          ]
        }"#,
        ];

        for test in tests {
            // Strip comments in the test, as a easy way to keep this test data annotated.
            let mut stripped = String::new();
            StripComments::new(test.as_bytes())
                .read_to_string(&mut stripped)
                .unwrap();

            let json: MessageJson = match serde_json::from_str(&stripped) {
                Ok(m) => m,
                Err(err) => panic!("failed to parse JSON: {}\n{}", err, stripped),
            };

            let m = Message::from_doh_json(json, true).expect("failed to reconstruct the Message");
            assert_eq!(m.qr, QR::Response);
        }
    }

    #[test]
    fn test_round_trip() {
        let mut m = Message::default();
        m.add_question("google.com", Type::MX, Class::Internet);
        m.qr = QR::Response;
        m.ra = true;
        m.answers.push(Record {
            name: "google.com.".to_string(),
            class: Class::Internet,
            ttl: 300,
            resource: Resource::MX(MX {
                preference: 10,
                exchange: "smtp.google.com.".to_string(),
            }),
        });
        m.authoritys.push(Record {
            name: "google.com.".to_string(),
            class: Class::Internet,
            ttl: 60,
            resource: Resource::SOA(SOA {
                mname: "ns1.google.com.".to_string(),
                rname: "dns-admin.google.com.".to_string(),
                serial: 12345,
                refresh: 900,
                retry: 900,
                expire: 1800,
                minimum: 60,
            }),
        });

        let got =
            Message::from_doh_json(m.to_doh_json(), true).expect("failed to round-trip through JSON");

        // The reconstructed message gets a fresh id, but everything that the
        // JSON form carries must be preserved.
        assert_eq!(got.rcode, m.rcode);
        assert_eq!(got.questions, m.questions);
        assert_eq!(got.answers, m.answers);
        assert_eq!(got.authoritys, m.authoritys);
        assert_eq!(got.additionals, m.additionals);
    }

    #[test]
    fn test_serialized_sections_are_titlecase() {
        let mut m = Message::default();
        m.add_question("example.com", Type::A, Class::Internet);

        let text = serde_json::to_string(&m.to_doh_json()).unwrap();

        for key in ["\"Status\"", "\"Question\"", "\"Answer\"", "\"Authority\"", "\"Additional\""] {
            assert!(text.contains(key), "missing {} in {}", key, text);
        }
        assert!(!text.contains("\"AA\""), "AA must be omitted: {}", text);
    }
}
