use crate::models::{AnalysisStats, Verdict, VerdictSignal};

/// AI 分析给出的结论词表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiVerdict {
    Benign,
    Clean,
    Malicious,
    Suspicious,
    /// 词表之外的值，按"尚无结论"处理
    Unrecognized,
}

impl AiVerdict {
    pub fn parse(raw: &str) -> AiVerdict {
        match raw.trim().to_lowercase().as_str() {
            "benign" => AiVerdict::Benign,
            "clean" => AiVerdict::Clean,
            "malicious" => AiVerdict::Malicious,
            "suspicious" => AiVerdict::Suspicious,
            _ => AiVerdict::Unrecognized,
        }
    }

    pub fn verdict(self) -> Verdict {
        match self {
            AiVerdict::Benign | AiVerdict::Clean => Verdict::Clean,
            AiVerdict::Malicious => Verdict::Malicious,
            AiVerdict::Suspicious => Verdict::Suspicious,
            AiVerdict::Unrecognized => Verdict::Pending,
        }
    }
}

/// 将扫描服务的原始信号归一化为状态
///
/// AI 结论优先；没有 AI 结论时按引擎计数 恶意 > 可疑 > 无害 的顺序判断。
pub fn classify(signal: &VerdictSignal<'_>) -> Verdict {
    if let Some(raw) = signal.ai_verdict.filter(|v| !v.trim().is_empty()) {
        return AiVerdict::parse(raw).verdict();
    }

    match signal.stats {
        Some(stats) => classify_stats(&stats),
        None => Verdict::Pending,
    }
}

fn classify_stats(stats: &AnalysisStats) -> Verdict {
    if stats.malicious > 0 {
        Verdict::Malicious
    } else if stats.suspicious > 0 {
        Verdict::Suspicious
    } else if stats.harmless > 0 {
        Verdict::Clean
    } else {
        Verdict::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(malicious: u32, suspicious: u32, harmless: u32) -> Option<AnalysisStats> {
        Some(AnalysisStats {
            malicious,
            suspicious,
            harmless,
            undetected: 12,
        })
    }

    #[test]
    fn test_ai_verdict_overrides_engine_counts() {
        let signal = VerdictSignal {
            ai_verdict: Some("benign"),
            stats: stats(5, 0, 0),
        };
        assert_eq!(classify(&signal), Verdict::Clean);
    }

    #[test]
    fn test_ai_vocabulary_table() {
        let cases = [
            ("benign", Verdict::Clean),
            ("clean", Verdict::Clean),
            ("malicious", Verdict::Malicious),
            ("suspicious", Verdict::Suspicious),
            ("MALICIOUS", Verdict::Malicious),
            ("  Suspicious\n", Verdict::Suspicious),
            ("undetected", Verdict::Pending),
            ("harmful?", Verdict::Pending),
        ];

        for (raw, expected) in cases {
            let signal = VerdictSignal {
                ai_verdict: Some(raw),
                stats: None,
            };
            assert_eq!(classify(&signal), expected, "verdict {:?}", raw);
        }
    }

    #[test]
    fn test_engine_count_priority() {
        let cases = [
            (stats(1, 3, 40), Verdict::Malicious),
            (stats(0, 2, 0), Verdict::Suspicious),
            (stats(0, 0, 7), Verdict::Clean),
            (stats(0, 0, 0), Verdict::Pending),
        ];

        for (stats, expected) in cases {
            let signal = VerdictSignal {
                ai_verdict: None,
                stats,
            };
            assert_eq!(classify(&signal), expected, "stats {:?}", stats);
        }
    }

    #[test]
    fn test_no_signal_is_pending() {
        assert_eq!(classify(&VerdictSignal::default()), Verdict::Pending);
    }

    #[test]
    fn test_blank_ai_verdict_falls_back_to_engines() {
        let signal = VerdictSignal {
            ai_verdict: Some("   "),
            stats: stats(0, 1, 0),
        };
        assert_eq!(classify(&signal), Verdict::Suspicious);
    }
}
