use crate::llm::ChatMessage;
use crate::model::QuestionRecord;

pub const NO_CONTEXT: &str = "관련 자료 없음";
pub const CONTEXT_HEADER: &str = "=== [엄선된 지식 컨텍스트] ===\n";

const CLASSIFIER_SYSTEM: &str = "당신은 과목 분류 전문가입니다. 주어진 문제가 구체적인 외부 지식(역사, 경제, 정치, 법률 등) 검색이 필요한 문제인지 판단하세요.
- 지식 검색이 꼭 필요한 경우: 'KNOWLEDGE_REQUIRED'
- 일반 논리, 단순 독해, 상식으로 풀 수 있는 경우: 'GENERAL'
결과는 반드시 'KNOWLEDGE_REQUIRED' 또는 'GENERAL' 중 한 단어로만 답하세요.";

const KEYWORD_SYSTEM: &str = "당신은 검색 전문가입니다. 반드시 {\"keywords\": [\"용어1\", \"용어2\"]} 형식의 JSON으로만 답변하십시오.";

const SOLVER_WITH_CONTEXT_SYSTEM: &str = "당신은 사료 해석에 능숙한 한국사 전문가입니다. 제공된 <개념 보충 자료>의 각 문서([1], [2] 등)를 근거로 문제를 해결하십시오.

[규칙]
1. <think> 태그 안에서 최대 7단계 이내로 추론하십시오.
2. 이미 검토한 내용을 반복하지 말고, 같은 추론이 되풀이되면 즉시 멈추십시오.
3. 자료가 부족하더라도 가장 근거가 확실한 선지를 선택하십시오.
4. 마지막 줄에는 반드시 {\"정답\": \"번호\"} 형식으로만 답하십시오.";

const SOLVER_GENERAL_SYSTEM: &str = "당신은 논리적이고 객관적인 수험생입니다. 지문을 분석하여 정답을 고르십시오.

[규칙]
1. 지문에 근거하여 최대 7단계 이내로 간결하게 추론하십시오.
2. 같은 내용을 반복하지 마십시오.
3. 마지막 줄에는 반드시 {\"정답\": \"번호\"} 형식으로만 답하십시오.";

const RECOVERY_SYSTEM: &str = "당신은 채점관입니다. 아래의 복잡한 추론 과정에서 모델이 최종적으로 도달하고자 했던 '가장 유력한 정답 번호' 하나만 선택하십시오. 반드시 숫자만 출력하십시오.";

pub fn classifier_messages(question: &QuestionRecord) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(CLASSIFIER_SYSTEM),
        ChatMessage::user(format!(
            "[지문]\n{}\n\n[질문]\n{}",
            question.paragraph, question.question
        )),
    ]
}

pub fn keyword_messages(question: &QuestionRecord) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(KEYWORD_SYSTEM),
        ChatMessage::user(format!(
            "지문: {}\n질문: {}",
            question.paragraph, question.question
        )),
    ]
}

pub fn solver_with_context_messages(question: &QuestionRecord, context: &str) -> Vec<ChatMessage> {
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };
    vec![
        ChatMessage::system(SOLVER_WITH_CONTEXT_SYSTEM),
        ChatMessage::user(format!(
            "<지문>\n{}\n\n<개념 보충 자료>\n{}\n\n<질문>\n{}\n\n<선지>\n{}",
            question.paragraph,
            context,
            question.question,
            question.numbered_choices()
        )),
    ]
}

pub fn solver_general_messages(question: &QuestionRecord) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SOLVER_GENERAL_SYSTEM),
        ChatMessage::user(format!(
            "[지문]: {}\n[질문]: {}\n[선지]:\n{}",
            question.paragraph,
            question.question,
            question.numbered_choices()
        )),
    ]
}

pub fn recovery_messages(full_response: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(RECOVERY_SYSTEM),
        ChatMessage::user(format!(
            "이전 추론 내용: {full_response}\n\n결국 정답은 몇 번입니까?"
        )),
    ]
}
