use crate::constants::MAX_COMMAND_LENGTH;
use crate::core_connection::error::EngineError;

#[derive(Eq, Hash, PartialEq, Debug, Clone, Copy)]
pub enum FtpCommand {
    USER,
    PASS,
    ACCT,
    QUIT,
    SYST,
    ABOR,
    PWD,
    NOOP,
    CWD,
    CDUP,
    TYPE,
    PASV,
    PORT,
    LIST,
    NLST,
    MKD,
    RMD,
    DELE,
    RNFR,
    RNTO,
    SIZE,
    REST,
    RETR,
    STOR,
    APPE,
    SITE,
    FEAT,
    AUTH,
    PBSZ,
    PROT,
    MODE,
}

impl FtpCommand {
    pub fn from_str(cmd: &str) -> Option<FtpCommand> {
        match cmd.to_ascii_uppercase().as_str() {
            "USER" => Some(FtpCommand::USER),
            "PASS" => Some(FtpCommand::PASS),
            "ACCT" => Some(FtpCommand::ACCT),
            "QUIT" => Some(FtpCommand::QUIT),
            "SYST" => Some(FtpCommand::SYST),
            "ABOR" => Some(FtpCommand::ABOR),
            "PWD" => Some(FtpCommand::PWD),
            "NOOP" => Some(FtpCommand::NOOP),
            "CWD" => Some(FtpCommand::CWD),
            "CDUP" => Some(FtpCommand::CDUP),
            "TYPE" => Some(FtpCommand::TYPE),
            "PASV" => Some(FtpCommand::PASV),
            "PORT" => Some(FtpCommand::PORT),
            "LIST" => Some(FtpCommand::LIST),
            "NLST" => Some(FtpCommand::NLST),
            "MKD" => Some(FtpCommand::MKD),
            "RMD" => Some(FtpCommand::RMD),
            "DELE" => Some(FtpCommand::DELE),
            "RNFR" => Some(FtpCommand::RNFR),
            "RNTO" => Some(FtpCommand::RNTO),
            "SIZE" => Some(FtpCommand::SIZE),
            "REST" => Some(FtpCommand::REST),
            "RETR" => Some(FtpCommand::RETR),
            "STOR" => Some(FtpCommand::STOR),
            "APPE" => Some(FtpCommand::APPE),
            "SITE" => Some(FtpCommand::SITE),
            "FEAT" => Some(FtpCommand::FEAT),
            "AUTH" => Some(FtpCommand::AUTH),
            "PBSZ" => Some(FtpCommand::PBSZ),
            "PROT" => Some(FtpCommand::PROT),
            "MODE" => Some(FtpCommand::MODE),
            _ => None,
        }
    }

    /// The verb of a typed command line, if it is one the engine knows.
    pub fn from_line(line: &str) -> Option<FtpCommand> {
        line.split_whitespace().next().and_then(FtpCommand::from_str)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FtpCommand::USER => "USER",
            FtpCommand::PASS => "PASS",
            FtpCommand::ACCT => "ACCT",
            FtpCommand::QUIT => "QUIT",
            FtpCommand::SYST => "SYST",
            FtpCommand::ABOR => "ABOR",
            FtpCommand::PWD => "PWD",
            FtpCommand::NOOP => "NOOP",
            FtpCommand::CWD => "CWD",
            FtpCommand::CDUP => "CDUP",
            FtpCommand::TYPE => "TYPE",
            FtpCommand::PASV => "PASV",
            FtpCommand::PORT => "PORT",
            FtpCommand::LIST => "LIST",
            FtpCommand::NLST => "NLST",
            FtpCommand::MKD => "MKD",
            FtpCommand::RMD => "RMD",
            FtpCommand::DELE => "DELE",
            FtpCommand::RNFR => "RNFR",
            FtpCommand::RNTO => "RNTO",
            FtpCommand::SIZE => "SIZE",
            FtpCommand::REST => "REST",
            FtpCommand::RETR => "RETR",
            FtpCommand::STOR => "STOR",
            FtpCommand::APPE => "APPE",
            FtpCommand::SITE => "SITE",
            FtpCommand::FEAT => "FEAT",
            FtpCommand::AUTH => "AUTH",
            FtpCommand::PBSZ => "PBSZ",
            FtpCommand::PROT => "PROT",
            FtpCommand::MODE => "MODE",
        }
    }

    /// Commands after which the cached working directory is stale.
    pub fn changes_working_path(&self) -> bool {
        matches!(self, FtpCommand::CWD | FtpCommand::CDUP)
    }

    pub fn changes_transfer_mode(&self) -> bool {
        matches!(self, FtpCommand::TYPE)
    }

    /// Builds `VERB arg\r\n`. Passwords are masked in the log text.
    pub fn prepare(&self, arg: Option<&str>) -> Result<PreparedCommand, EngineError> {
        let wire = match arg {
            Some(arg) => format!("{} {}\r\n", self.as_str(), arg),
            None => format!("{}\r\n", self.as_str()),
        };
        let log_text = match (self, arg) {
            (FtpCommand::PASS, Some(_)) | (FtpCommand::ACCT, Some(_)) => {
                format!("{} (hidden)\r\n", self.as_str())
            }
            _ => wire.clone(),
        };
        PreparedCommand::checked(wire, log_text)
    }
}

/// A command line ready for the wire plus what goes to the session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub wire: String,
    pub log_text: String,
}

impl PreparedCommand {
    /// A user-typed command, sent as is.
    pub fn raw(text: &str) -> Result<Self, EngineError> {
        let text = text.trim_end_matches(&['\r', '\n'][..]);
        let wire = format!("{}\r\n", text);
        let log_text = match FtpCommand::from_line(text) {
            Some(cmd @ (FtpCommand::PASS | FtpCommand::ACCT)) => {
                format!("{} (hidden)\r\n", cmd.as_str())
            }
            _ => wire.clone(),
        };
        Self::checked(wire, log_text)
    }

    fn checked(wire: String, log_text: String) -> Result<Self, EngineError> {
        if wire.len() >= MAX_COMMAND_LENGTH {
            return Err(EngineError::CommandTooLong);
        }
        Ok(Self { wire, log_text })
    }
}
