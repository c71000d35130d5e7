use std::{fmt::Display, str::FromStr};

pub type AgencyId = u32;

/// The number that wins the lottery
pub const LOTTERY_WINNER_NUMBER: u32 = 7574;

const FIELD_COUNT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub agency: AgencyId,
    pub first_name: String,
    pub last_name: String,
    pub document: String,
    pub birthdate: String,
    pub number: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BetParseErr {
    #[error("expected 6 comma separated fields, found {0}")]
    FieldCount(usize),

    #[error("the {0} field is empty")]
    EmptyField(&'static str),

    #[error("invalid agency id: {0}")]
    InvalidAgency(String),

    #[error("the batch is not valid utf-8")]
    Encoding,
}

impl Bet {
    /// Whether the bet won the lottery
    pub fn has_won(&self) -> bool {
        self.number.parse::<u32>() == Ok(LOTTERY_WINNER_NUMBER)
    }

    /// Parses a bet from the storage layout: `agency,first_name,last_name,document,birthdate,number`
    pub fn from_record(record: &str) -> Result<Self, BetParseErr> {
        let [agency, first_name, last_name, document, birthdate, number] = split_fields(record)?;
        Self::from_fields(agency, first_name, last_name, document, birthdate, number)
    }

    fn from_fields(
        agency: &str,
        first_name: &str,
        last_name: &str,
        document: &str,
        birthdate: &str,
        number: &str,
    ) -> Result<Self, BetParseErr> {
        let named = [
            ("agency", agency),
            ("first name", first_name),
            ("last name", last_name),
            ("document", document),
            ("birthdate", birthdate),
            ("number", number),
        ];
        if let Some((name, _)) = named.iter().find(|(_, value)| value.is_empty()) {
            return Err(BetParseErr::EmptyField(*name));
        }

        let agency = agency
            .parse()
            .map_err(|_| BetParseErr::InvalidAgency(agency.into()))?;

        Ok(Self {
            agency,
            first_name: first_name.into(),
            last_name: last_name.into(),
            document: document.into(),
            birthdate: birthdate.into(),
            number: number.into(),
        })
    }
}

/// Parses a bet the way agencies send it: `first_name,last_name,document,birthdate,number,agency`
impl FromStr for Bet {
    type Err = BetParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [first_name, last_name, document, birthdate, number, agency] = split_fields(s)?;
        Self::from_fields(agency, first_name, last_name, document, birthdate, number)
    }
}

/// Formats a bet in the storage layout, the inverse of `Bet::from_record`
impl Display for Bet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.agency,
            self.first_name,
            self.last_name,
            self.document,
            self.birthdate,
            self.number
        )
    }
}

fn split_fields(line: &str) -> Result<[&str; FIELD_COUNT], BetParseErr> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let count = fields.len();

    fields
        .try_into()
        .map_err(|_| BetParseErr::FieldCount(count))
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("record {line} out of {attempted} is malformed: {reason}")]
pub struct BatchErr {
    /// number of records the batch contained
    pub attempted: usize,
    /// 1-based index of the first bad record
    pub line: usize,
    #[source]
    pub reason: BetParseErr,
}

/// Parses a newline separated batch of bets
///
/// the batch is all or nothing: a single malformed record rejects the entire batch.
/// blank lines are ignored and do not count as records.
pub fn parse_batch(payload: &[u8]) -> Result<Vec<Bet>, BatchErr> {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Err(BatchErr {
            attempted: count_records(&String::from_utf8_lossy(payload)),
            line: 1,
            reason: BetParseErr::Encoding,
        });
    };

    let records: Vec<&str> = records(text).collect();
    let attempted = records.len();

    records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| {
            record.parse::<Bet>().map_err(|reason| BatchErr {
                attempted,
                line: idx + 1,
                reason,
            })
        })
        .collect()
}

fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
}

fn count_records(text: &str) -> usize {
    records(text).count()
}
